// tests/runtime_fake_runner.rs

use std::error::Error;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Duration;

use cycler::config::workflow::WorkflowConfig;
use cycler::errors::SchedulerError;
use cycler::fs::mock::MockFileSystem;
use cycler::scheduler::{Runtime, SchedulerEvent, SchedulerOptions};
use cycler::subproc::{CommandContext, CommandKind};
use cycler::task::TaskStatus;
use cycler::types::StopMode;
use cycler_test_utils::builders::{TaskConfigBuilder, WorkflowConfigBuilder};
use cycler_test_utils::fake_runner::FakeCommandRunner;
use cycler_test_utils::harness::{core_for, status_of};
use cycler_test_utils::recording_store::RecordingStore;
use cycler_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

const TICK: Duration = Duration::from_millis(10);

/// foo then bar at every point.
fn chain(final_point: i64) -> WorkflowConfig {
    WorkflowConfigBuilder::new()
        .final_point(final_point)
        .with_task("foo", TaskConfigBuilder::new().script("true"))
        .with_task("bar", TaskConfigBuilder::new().script("true").after("foo"))
        .build()
}

fn submitted_jobs(dispatched: &Arc<Mutex<Vec<CommandContext>>>) -> Vec<String> {
    let guard = dispatched.lock().expect("dispatch log");
    let mut jobs: Vec<String> = guard
        .iter()
        .filter(|ctx| ctx.kind == CommandKind::JobsSubmit)
        .flat_map(|ctx| ctx.job_refs.iter().map(|j| j.to_string()))
        .collect();
    jobs.sort();
    jobs
}

#[tokio::test]
async fn runtime_runs_a_workflow_to_completion() -> TestResult {
    init_tracing();
    let (tx, rx) = mpsc::channel(1024);
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let runner = FakeCommandRunner::new(tx.clone(), Arc::clone(&dispatched));
    let closed = runner.closed_flag();

    let fs = MockFileSystem::new();
    let store = RecordingStore::new();
    let mut core = core_for(chain(2), &fs, &store, SchedulerOptions::default());
    core.start(false, Utc::now())?;

    let core = with_timeout(Runtime::new(core, rx, runner, TICK).run()).await?;

    assert_eq!(core.stop_mode(), Some(StopMode::Auto));
    assert!(closed.load(Ordering::SeqCst), "runner should be closed on shutdown");
    assert_eq!(
        submitted_jobs(&dispatched),
        vec!["1/bar/01", "1/foo/01", "2/bar/01", "2/foo/01"]
    );
    Ok(())
}

#[tokio::test]
async fn runtime_returns_the_stall_error_when_told_to_abort() -> TestResult {
    init_tracing();
    let (tx, rx) = mpsc::channel(1024);
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let runner = FakeCommandRunner::new(tx.clone(), Arc::clone(&dispatched))
        .with_messages(vec!["started", "failed"]);
    let closed = runner.closed_flag();

    let options = SchedulerOptions {
        abort_if_stalled: true,
        ..Default::default()
    };
    let fs = MockFileSystem::new();
    let store = RecordingStore::new();
    let mut core = core_for(chain(1), &fs, &store, options);
    core.start(false, Utc::now())?;

    let result = with_timeout(Runtime::new(core, rx, runner, TICK).run()).await;

    assert!(matches!(result, Err(SchedulerError::Stalled(_))));
    assert!(closed.load(Ordering::SeqCst), "runner should be closed on abort");
    assert_eq!(submitted_jobs(&dispatched), vec!["1/foo/01"]);
    Ok(())
}

#[tokio::test]
async fn shutdown_request_stops_and_leaves_jobs_behind() -> TestResult {
    init_tracing();
    let (tx, rx) = mpsc::channel(1024);
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    // Jobs never report back.
    let runner = FakeCommandRunner::new(tx.clone(), Arc::clone(&dispatched)).with_messages(vec![]);

    let fs = MockFileSystem::new();
    let store = RecordingStore::new();
    let mut core = core_for(chain(1), &fs, &store, SchedulerOptions::default());
    core.start(false, Utc::now())?;

    let shutdown = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = shutdown.send(SchedulerEvent::ShutdownRequested).await;
    });

    let core = with_timeout(Runtime::new(core, rx, runner, TICK).run()).await?;

    assert_eq!(core.stop_mode(), Some(StopMode::RequestNow));
    assert_eq!(status_of(core.pool(), "foo", 1), Some(TaskStatus::Submitted));
    Ok(())
}
