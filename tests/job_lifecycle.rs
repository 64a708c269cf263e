// tests/job_lifecycle.rs

use std::path::Path;

use chrono::{DateTime, Utc};

use cycler::config::{PlatformSection, RuntimeSection, WorkflowConfig};
use cycler::cycling::CyclePoint;
use cycler::fs::mock::MockFileSystem;
use cycler::job::{MessageFlag, TaskJobManager, MSG_KILL_FAILED, MSG_REMOTE_INIT};
use cycler::pool::TaskPool;
use cycler::subproc::{CommandContext, CommandKind, CommandResult};
use cycler::task::{TaskId, TaskStatus};
use cycler::types::{RunMode, Severity};
use cycler_test_utils::builders::{TaskConfigBuilder, WorkflowConfigBuilder};
use cycler_test_utils::fake_runner::{submit_ok, summary_line};
use cycler_test_utils::harness::{at, id, job_manager, pool_for, status_of, t0};
use cycler_test_utils::init_tracing;

const JOB_FILE: &str = "/cycler-test/run/log/job/1/foo/01/job";

struct Fixture {
    pool: TaskPool,
    jobs: TaskJobManager,
    fs: MockFileSystem,
}

impl Fixture {
    fn new(config: WorkflowConfig) -> Self {
        let fs = MockFileSystem::new();
        let jobs = job_manager(&config, &fs);
        let mut pool = pool_for(config);
        pool.load_from_point(t0());
        pool.release_runahead_tasks(t0());
        Self { pool, jobs, fs }
    }

    /// Queue and submit whatever is ready; return the commands produced.
    fn submit(&mut self, now: DateTime<Utc>) -> Vec<CommandContext> {
        let ready = self.pool.get_ready_tasks(now);
        self.jobs.submit_task_jobs(&mut self.pool, &ready, now);
        self.jobs.take_commands()
    }

    fn result(&mut self, result: CommandResult, now: DateTime<Utc>) {
        self.jobs.handle_command_result(&mut self.pool, result, now);
    }

    fn message(&mut self, task: &TaskId, message: &str, now: DateTime<Utc>) -> bool {
        self.jobs.process_message(
            &mut self.pool,
            task,
            Severity::Info,
            message,
            None,
            MessageFlag::Received,
            now,
        )
    }

    /// Submit, accept the submission and start the job.
    fn run_to_started(&mut self, now: DateTime<Utc>) {
        let commands = self.submit(now);
        let submit = commands
            .iter()
            .find(|c| c.kind == CommandKind::JobsSubmit)
            .expect("a submit command");
        self.result(submit_ok(submit), now);
        self.message(&id("foo", 1), "started", now);
    }

    fn status(&self) -> Option<TaskStatus> {
        status_of(&self.pool, "foo", 1)
    }
}

fn single(task: TaskConfigBuilder) -> WorkflowConfig {
    WorkflowConfigBuilder::new()
        .final_point(1)
        .with_task("foo", task)
        .build()
}

fn with_fields(ctx: &CommandContext, fields: &[&str]) -> CommandResult {
    let out: Vec<String> = ctx.job_refs.iter().map(|j| summary_line(j, fields)).collect();
    CommandResult::new(ctx.clone(), 0, out.join("\n"), "")
}

#[test]
fn submission_writes_the_job_file_and_queues_one_command() {
    init_tracing();
    let mut fx = Fixture::new(single(
        TaskConfigBuilder::new().script("echo hello").env("GREETING", "hi"),
    ));

    let commands = fx.submit(t0());

    assert_eq!(commands.len(), 1);
    let submit = &commands[0];
    assert_eq!(submit.kind, CommandKind::JobsSubmit);
    assert_eq!(submit.job_refs.len(), 1);
    assert_eq!(submit.job_refs[0].to_string(), "1/foo/01");
    assert!(submit.argv.iter().any(|a| a == "jobs-submit"));
    assert!(submit.argv.iter().any(|a| a == "/cycler-test/run/log/job"));
    assert_eq!(submit.argv.last().map(String::as_str), Some("1/foo/01"));

    assert_eq!(fx.status(), Some(TaskStatus::Ready));
    let script = cycler::fs::FileSystem::read_to_string(&fx.fs, Path::new(JOB_FILE))
        .expect("job file written");
    assert!(script.contains("echo hello"));
    assert!(script.contains("export CYCLER_TASK_NAME='foo'"));
    assert!(script.contains("export GREETING='hi'"));
    assert!(fx.fs.is_executable(JOB_FILE));
}

#[test]
fn first_submission_clears_logs_of_an_earlier_run() {
    init_tracing();
    let mut fx = Fixture::new(single(TaskConfigBuilder::new().script("true")));
    fx.fs.add_file("/cycler-test/run/log/job/1/foo/01/job.out", "stale");
    fx.fs.add_file("/cycler-test/run/log/job/1/foo/02/job.err", "stale");
    fx.fs.add_file("/cycler-test/run/log/job/1/bar/01/job.out", "other task");

    fx.submit(t0());

    let paths: Vec<String> = fx.fs.paths().iter().map(|p| p.display().to_string()).collect();
    assert_eq!(
        paths,
        vec!["/cycler-test/run/log/job/1/bar/01/job.out", JOB_FILE]
    );
}

#[test]
fn job_messages_walk_the_status_ladder() {
    init_tracing();
    let config = WorkflowConfigBuilder::new()
        .final_point(1)
        .with_task("foo", TaskConfigBuilder::new().script("true"))
        .with_task("bar", TaskConfigBuilder::new().after("foo:started"))
        .build();
    let mut fx = Fixture::new(config);
    let commands = fx.submit(t0());

    fx.result(submit_ok(&commands[0]), at(1));
    assert_eq!(fx.status(), Some(TaskStatus::Submitted));
    let itask = fx.pool.get_task(&id("foo", 1)).expect("foo in pool");
    assert_eq!(itask.summary.job_id.as_deref(), Some("1000"));
    assert!(itask.poll_timer.is_some());

    assert!(fx.message(&id("foo", 1), "started", at(2)));
    assert_eq!(fx.status(), Some(TaskStatus::Running));
    assert!(fx.pool.get_task(&id("bar", 1)).is_some(), "started spawns bar");

    // A late duplicate does not move the task backwards.
    assert!(!fx.message(&id("foo", 1), "submitted", at(3)));
    assert_eq!(fx.status(), Some(TaskStatus::Running));

    assert!(fx.message(&id("foo", 1), "succeeded", at(4)));
    assert_eq!(fx.status(), Some(TaskStatus::Succeeded));
    assert_eq!(fx.pool.finished_queue(), &[id("foo", 1)]);
}

#[test]
fn missing_submit_summary_means_submit_failed() {
    init_tracing();
    let mut fx = Fixture::new(single(TaskConfigBuilder::new().script("true")));
    let commands = fx.submit(t0());

    fx.result(CommandResult::new(commands[0].clone(), 1, "", "job runner exploded"), at(1));

    assert_eq!(fx.status(), Some(TaskStatus::SubmitFailed));
}

#[test]
fn shutdown_return_code_is_ignored() {
    init_tracing();
    let mut fx = Fixture::new(single(TaskConfigBuilder::new().script("true")));
    let commands = fx.submit(t0());

    fx.result(CommandResult::new(commands[0].clone(), 999, "", ""), at(1));

    assert_eq!(fx.status(), Some(TaskStatus::Ready));
}

#[test]
fn repeated_submit_summary_does_not_overwrite_the_first() {
    init_tracing();
    let mut fx = Fixture::new(single(TaskConfigBuilder::new().script("true")));
    let commands = fx.submit(t0());
    let job = &commands[0].job_refs[0];
    let out = [
        summary_line(job, &["0", "123"]),
        summary_line(job, &["1"]),
    ]
    .join("\n");

    fx.result(CommandResult::new(commands[0].clone(), 0, out, ""), at(1));

    assert_eq!(fx.status(), Some(TaskStatus::Submitted));
    let foo = fx.pool.get_task(&id("foo", 1)).expect("foo in pool");
    assert_eq!(foo.summary.job_id.as_deref(), Some("123"));
}

#[test]
fn submission_retries_use_their_own_delays() {
    init_tracing();
    let mut fx = Fixture::new(single(
        TaskConfigBuilder::new()
            .script("true")
            .submission_retry_delays(&["PT30S"]),
    ));
    let commands = fx.submit(t0());
    fx.result(CommandResult::new(commands[0].clone(), 1, "", ""), t0());
    assert_eq!(fx.status(), Some(TaskStatus::SubmitRetrying));

    assert!(fx.submit(at(29)).is_empty());
    let again = fx.submit(at(30));
    assert_eq!(again[0].job_refs[0].to_string(), "1/foo/02");

    fx.result(CommandResult::new(again[0].clone(), 1, "", ""), at(31));
    assert_eq!(fx.status(), Some(TaskStatus::SubmitFailed));
}

#[test]
fn execution_retries_run_one_more_try_than_delays() {
    init_tracing();
    let mut fx = Fixture::new(single(
        TaskConfigBuilder::new()
            .script("false")
            .execution_retry_delays(&["PT10S", "PT20S"]),
    ));
    let foo = id("foo", 1);

    fx.run_to_started(t0());
    fx.message(&foo, "failed", at(1));
    assert_eq!(fx.status(), Some(TaskStatus::Retrying));
    let itask = fx.pool.get_task(&foo).expect("foo in pool");
    assert_eq!(itask.summary.latest_message.as_deref(), Some("retrying in PT10S"));
    assert_eq!(itask.try_num(), 2);

    // Not yet due.
    assert!(fx.submit(at(10)).is_empty());

    fx.run_to_started(at(11));
    assert_eq!(fx.pool.get_task(&foo).map(|t| t.submit_num), Some(2));
    fx.message(&foo, "failed", at(12));
    assert_eq!(fx.status(), Some(TaskStatus::Retrying));

    fx.run_to_started(at(32));
    fx.message(&foo, "failed", at(33));

    assert_eq!(fx.status(), Some(TaskStatus::Failed));
    let itask = fx.pool.get_task(&foo).expect("foo in pool");
    assert_eq!(itask.submit_num, 3);
    assert!(itask.state.outputs.is_completed("failed"));
    assert_eq!(fx.pool.finished_queue(), &[foo]);
}

#[test]
fn retry_script_sees_the_try_number() {
    init_tracing();
    let mut fx = Fixture::new(single(
        TaskConfigBuilder::new()
            .script("false")
            .execution_retry_delays(&["PT1S"]),
    ));
    fx.run_to_started(t0());
    fx.message(&id("foo", 1), "failed", t0());
    fx.submit(at(1));

    let script = cycler::fs::FileSystem::read_to_string(
        &fx.fs,
        Path::new("/cycler-test/run/log/job/1/foo/02/job"),
    )
    .expect("second job file");
    assert!(script.contains("export CYCLER_TASK_TRY_NUMBER='2'"));
    assert!(script.contains("export CYCLER_TASK_SUBMIT_NUMBER='2'"));
}

#[test]
fn poll_of_a_signalled_job_records_the_signal() {
    init_tracing();
    let mut fx = Fixture::new(single(TaskConfigBuilder::new().script("sleep 100")));
    fx.run_to_started(t0());

    let polled = fx.jobs.poll_task_jobs(&mut fx.pool, &[id("foo", 1)], false);
    assert_eq!(polled, vec![id("foo", 1)]);
    let poll = fx.jobs.take_commands();
    assert_eq!(poll[0].kind, CommandKind::JobsPoll);

    fx.result(with_fields(&poll[0], &["1", "TERM", "1", "", "", ""]), at(5));

    assert_eq!(fx.status(), Some(TaskStatus::Failed));
    let itask = fx.pool.get_task(&id("foo", 1)).expect("foo in pool");
    assert_eq!(itask.summary.run_signal.as_deref(), Some("TERM"));
    assert_eq!(itask.summary.latest_message.as_deref(), Some("failed/TERM"));
}

#[test]
fn short_poll_summary_leaves_the_task_alone() {
    init_tracing();
    let mut fx = Fixture::new(single(TaskConfigBuilder::new().script("sleep 100")));
    fx.run_to_started(t0());
    fx.jobs.poll_task_jobs(&mut fx.pool, &[id("foo", 1)], false);
    let poll = fx.jobs.take_commands();

    fx.result(with_fields(&poll[0], &["0"]), at(5));

    assert_eq!(fx.status(), Some(TaskStatus::Running));
    let itask = fx.pool.get_task(&id("foo", 1)).expect("foo in pool");
    assert_eq!(itask.summary.latest_message.as_deref(), Some("poll failed"));
}

#[test]
fn running_past_the_time_limit_fails_with_xcpu() {
    init_tracing();
    let mut fx = Fixture::new(single(
        TaskConfigBuilder::new()
            .script("sleep 1000")
            .execution_time_limit("PT60S"),
    ));
    fx.run_to_started(t0());
    fx.jobs.poll_task_jobs(&mut fx.pool, &[id("foo", 1)], false);
    let poll = fx.jobs.take_commands();

    fx.result(
        with_fields(&poll[0], &["", "", "0", "", "2026-01-01T00:00:00Z", ""]),
        at(120),
    );

    assert_eq!(fx.status(), Some(TaskStatus::Failed));
    let itask = fx.pool.get_task(&id("foo", 1)).expect("foo in pool");
    assert_eq!(itask.summary.run_signal.as_deref(), Some("XCPU"));
}

#[test]
fn poll_timer_decides_when_jobs_are_checked() {
    init_tracing();
    let mut fx = Fixture::new(single(TaskConfigBuilder::new().script("true")));
    let commands = fx.submit(t0());
    fx.result(submit_ok(&commands[0]), t0());

    assert!(fx.jobs.check_task_jobs(&mut fx.pool, at(60)).is_empty());
    assert!(!fx.jobs.has_pending_commands());

    // Localhost polls submitted jobs every 15 minutes.
    assert_eq!(fx.jobs.check_task_jobs(&mut fx.pool, at(900)), vec![id("foo", 1)]);
    assert_eq!(fx.jobs.take_commands()[0].kind, CommandKind::JobsPoll);
}

#[test]
fn kill_holds_and_fails_a_running_task() {
    init_tracing();
    let mut fx = Fixture::new(single(TaskConfigBuilder::new().script("sleep 100")));
    fx.run_to_started(t0());

    let killed = fx.jobs.kill_task_jobs(&mut fx.pool, &[id("foo", 1)], at(5));
    assert_eq!(killed, vec![id("foo", 1)]);
    let kill = fx.jobs.take_commands();
    assert_eq!(kill[0].kind, CommandKind::JobsKill);

    fx.result(with_fields(&kill[0], &["0"]), at(6));

    let itask = fx.pool.get_task(&id("foo", 1)).expect("foo in pool");
    assert_eq!(itask.state.status, TaskStatus::Failed);
    assert!(itask.state.is_held);
}

#[test]
fn failed_kill_is_flagged() {
    init_tracing();
    let mut fx = Fixture::new(single(TaskConfigBuilder::new().script("sleep 100")));
    fx.run_to_started(t0());
    fx.jobs.kill_task_jobs(&mut fx.pool, &[id("foo", 1)], at(5));
    let kill = fx.jobs.take_commands();

    fx.result(with_fields(&kill[0], &["1"]), at(6));

    let itask = fx.pool.get_task(&id("foo", 1)).expect("foo in pool");
    assert_eq!(itask.state.status, TaskStatus::Running);
    assert!(itask.state.kill_failed);
    assert_eq!(itask.summary.latest_message.as_deref(), Some(MSG_KILL_FAILED));
}

#[test]
fn skip_mode_completes_outputs_without_a_job() {
    init_tracing();
    let mut fx = Fixture::new(single(
        TaskConfigBuilder::new()
            .run_mode(RunMode::Skip)
            .output("x", "x ready"),
    ));

    let commands = fx.submit(t0());

    assert!(commands.is_empty());
    assert_eq!(fx.status(), Some(TaskStatus::Succeeded));
    let itask = fx.pool.get_task(&id("foo", 1)).expect("foo in pool");
    assert!(itask.state.outputs.is_completed("x"));
    assert!(fx.fs.paths().is_empty());
}

#[test]
fn skip_mode_can_be_told_to_fail() {
    init_tracing();
    let mut fx = Fixture::new(single(
        TaskConfigBuilder::new()
            .run_mode(RunMode::Skip)
            .skip_outputs(&["failed"]),
    ));

    fx.submit(t0());

    assert_eq!(fx.status(), Some(TaskStatus::Failed));
}

#[test]
fn simulation_finishes_after_its_run_length() {
    init_tracing();
    let config = WorkflowConfigBuilder::new()
        .final_point(2)
        .run_mode(RunMode::Simulation)
        .with_task("foo", TaskConfigBuilder::new().simulation("PT30S", &[2]))
        .build();
    let mut fx = Fixture::new(config);

    assert!(fx.submit(t0()).is_empty());
    assert_eq!(fx.status(), Some(TaskStatus::Running));
    assert_eq!(fx.jobs.simulated_jobs(), 1);

    assert!(!fx.jobs.sim_time_check(&mut fx.pool, at(29)));
    assert!(fx.jobs.sim_time_check(&mut fx.pool, at(30)));
    assert_eq!(fx.status(), Some(TaskStatus::Succeeded));

    // Point 2 is configured to fail.
    fx.pool.release_runahead_tasks(at(30));
    fx.submit(at(30));
    fx.jobs.sim_time_check(&mut fx.pool, at(60));
    assert_eq!(status_of(&fx.pool, "foo", 2), Some(TaskStatus::Failed));
}

fn remote_config() -> WorkflowConfig {
    WorkflowConfigBuilder::new()
        .final_point(1)
        .with_platform(
            "hpc",
            PlatformSection {
                hosts: vec!["hpc1".to_string()],
                job_runner: Some("slurm".to_string()),
                ..Default::default()
            },
        )
        .with_task("foo", TaskConfigBuilder::new().script("true").platform("hpc"))
        .build()
}

#[test]
fn remote_platform_waits_for_init_then_submits_over_ssh() {
    init_tracing();
    let mut fx = Fixture::new(remote_config());

    let commands = fx.submit(t0());
    assert_eq!(commands.len(), 1);
    assert!(matches!(
        &commands[0].kind,
        CommandKind::RemoteInit { host, owner: None } if host == "hpc1"
    ));
    assert_eq!(fx.status(), Some(TaskStatus::Queued));
    let itask = fx.pool.get_task(&id("foo", 1)).expect("foo in pool");
    assert_eq!(itask.summary.latest_message.as_deref(), Some(MSG_REMOTE_INIT));

    // Still initialising: nothing goes out.
    assert!(fx.submit(at(1)).is_empty());

    fx.result(CommandResult::new(commands[0].clone(), 0, "", ""), at(2));
    let commands = fx.submit(at(3));
    assert_eq!(commands.len(), 1);
    let submit = &commands[0];
    assert_eq!(submit.kind, CommandKind::JobsSubmit);
    assert_eq!(submit.argv[0], "ssh");
    assert!(submit.argv.iter().any(|a| a == "hpc1"));
    assert!(submit.argv.iter().any(|a| a == "--job-runner=slurm"));
    assert_eq!(submit.job_refs[0].to_string(), "1/foo/01");
}

#[test]
fn failed_remote_init_fails_the_submission() {
    init_tracing();
    let mut fx = Fixture::new(remote_config());
    let commands = fx.submit(t0());

    fx.result(CommandResult::new(commands[0].clone(), 1, "", "no route"), at(1));
    assert!(fx.submit(at(2)).is_empty());

    assert_eq!(fx.status(), Some(TaskStatus::SubmitFailed));
}

#[test]
fn unknown_platform_in_a_broadcast_fails_without_retry() {
    init_tracing();
    let mut fx = Fixture::new(single(
        TaskConfigBuilder::new()
            .script("true")
            .submission_retry_delays(&["PT1S"]),
    ));
    let settings = RuntimeSection {
        platform: Some("nowhere".to_string()),
        ..Default::default()
    };
    fx.jobs.broadcasts_mut().put_broadcast(None, "foo", &settings);

    assert!(fx.submit(t0()).is_empty());

    assert_eq!(fx.status(), Some(TaskStatus::SubmitFailed));
}

#[test]
fn broadcast_overrides_the_script_for_one_point() {
    init_tracing();
    let mut fx = Fixture::new(single(TaskConfigBuilder::new().script("echo configured")));
    let settings = RuntimeSection {
        script: Some("echo broadcast".to_string()),
        ..Default::default()
    };
    fx.jobs
        .broadcasts_mut()
        .put_broadcast(Some(CyclePoint::new(1)), "root", &settings);

    fx.submit(t0());

    let script = cycler::fs::FileSystem::read_to_string(&fx.fs, Path::new(JOB_FILE))
        .expect("job file written");
    assert!(script.contains("echo broadcast"));
    assert!(!script.contains("echo configured"));
}

#[test]
fn unwritable_job_file_fails_the_submission() {
    init_tracing();
    let mut fx = Fixture::new(single(TaskConfigBuilder::new().script("true")));
    fx.fs.set_fail_writes(true);

    assert!(fx.submit(t0()).is_empty());

    assert_eq!(fx.status(), Some(TaskStatus::SubmitFailed));
}

#[test]
fn batches_split_evenly() {
    init_tracing();
    let mut builder = WorkflowConfigBuilder::new().final_point(1).batch_size(2);
    for name in ["a", "b", "c", "d", "e"] {
        builder = builder.with_task(name, TaskConfigBuilder::new().script("true"));
    }
    let mut fx = Fixture::new(builder.build());

    let commands = fx.submit(t0());

    let sizes: Vec<usize> = commands.iter().map(|c| c.job_refs.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}
