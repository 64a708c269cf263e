// tests/config_loading.rs

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use cycler::config::loader::load_and_validate;
use cycler::config::workflow::RunaheadLimit;
use cycler::cycling::CyclePoint;
use cycler::errors::SchedulerError;
use cycler::types::RunMode;
use cycler_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(dir: &TempDir, contents: &str) -> Result<PathBuf, Box<dyn Error>> {
    let path = dir.path().join("Cycler.toml");
    fs::write(&path, contents)?;
    Ok(path)
}

fn config_error(contents: &str) -> Result<String, Box<dyn Error>> {
    let dir = TempDir::new()?;
    let path = write_config(&dir, contents)?;
    match load_and_validate(&path) {
        Err(SchedulerError::ConfigError(msg)) => Ok(msg),
        Err(other) => Err(format!("expected a config error, got {other}").into()),
        Ok(_) => Err("expected the config to be rejected".into()),
    }
}

const FULL: &str = r#"
[scheduler]
workflow_name = "demo"
run_dir = "run"
batch_size = 10
tick = "500ms"

[scheduling]
initial_point = 1
final_point = 4
runahead_limit = "P2"
run_mode = "dummy"
clock_origin = "2026-01-01T00:00:00Z"
clock_cycle = "1h"

[queues.models]
limit = 2
members = ["MODELS"]

[task.prep]
clock_offset = "P0"

[task.model_a]
after = ["prep", "model_a[-P1]"]

[task.model_b]
after = ["prep"]

[task.report]
after_any = [["model_a", "model_b"]]
outputs = { drafted = "report drafted" }

[runtime.root]
script = "true"
environment = { SITE = "test" }

[runtime.MODELS]
platform = "hpc"
execution_retry_delays = ["2*PT10S"]

[runtime.model_a]
inherit = "MODELS"
script = "run-model a"

[runtime.model_b]
inherit = "MODELS"

[platforms.hpc]
hosts = ["login1", "login2"]
job_runner = "slurm"
"#;

#[test]
fn full_config_resolves_queues_inheritance_and_platforms() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let path = write_config(&dir, FULL)?;

    let config = load_and_validate(&path)?;

    assert_eq!(config.global.workflow_name, "demo");
    assert_eq!(config.global.batch_size, 10);
    assert_eq!(config.global.tick, Duration::from_millis(500));
    assert_eq!(config.global.state_file, PathBuf::from("run").join("state.toml"));
    assert_eq!(config.initial_point, CyclePoint::new(1));
    assert_eq!(config.final_point, Some(CyclePoint::new(4)));
    assert!(matches!(config.runahead_limit, RunaheadLimit::Interval(i) if i.value() == 2));
    assert_eq!(config.run_mode, RunMode::Dummy);

    let models = &config.queues["models"];
    assert_eq!(models.limit, 2);
    assert_eq!(
        models.members.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["model_a", "model_b"]
    );
    assert!(config.queues["default"].members.contains("prep"));

    let model_a = &config.taskdefs["model_a"];
    assert_eq!(model_a.namespace_hierarchy, vec!["model_a", "MODELS", "root"]);
    assert_eq!(model_a.queue, "models");
    assert_eq!(model_a.rtconfig.script, "run-model a");
    assert_eq!(model_a.rtconfig.platform.as_deref(), Some("hpc"));
    assert_eq!(
        model_a.rtconfig.execution_retry_delays,
        vec![Duration::from_secs(10), Duration::from_secs(10)]
    );
    assert_eq!(model_a.rtconfig.environment["SITE"], "test");
    assert_eq!(config.taskdefs["model_b"].rtconfig.script, "true");

    let hpc = config.platform("hpc")?;
    assert_eq!(hpc.host(), "login1");
    assert_eq!(hpc.job_runner, "slurm");
    assert!(hpc.is_remote());

    let clock = config.clock.ok_or("clock should be configured")?;
    assert_eq!(clock.cycle, Duration::from_secs(3600));
    assert!(config.taskdefs["prep"].clock_offset.is_some());
    assert_eq!(config.taskdefs["report"].outputs["drafted"], "report drafted");
    Ok(())
}

#[test]
fn defaults_apply_to_a_minimal_config() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        r#"
[scheduling]
initial_point = 1

[task.only]
"#,
    )?;

    let config = load_and_validate(&path)?;

    assert_eq!(config.final_point, None);
    assert_eq!(config.runahead_limit, RunaheadLimit::Count(3));
    assert_eq!(config.run_mode, RunMode::Live);
    assert_eq!(config.queues["default"].limit, 0);
    assert!(config.clock.is_none());
    assert!(config.platform("localhost").is_ok());
    Ok(())
}

#[test]
fn unknown_trigger_is_rejected() -> TestResult {
    init_tracing();
    let msg = config_error(
        r#"
[scheduling]
initial_point = 1

[task.b]
after = ["a"]
"#,
    )?;
    assert!(msg.contains("unknown dependency 'a'"), "{msg}");
    Ok(())
}

#[test]
fn clock_origin_needs_a_cycle_length() -> TestResult {
    init_tracing();
    let msg = config_error(
        r#"
[scheduling]
initial_point = 1
clock_origin = "2026-01-01T00:00:00Z"

[task.a]
"#,
    )?;
    assert!(msg.contains("must be set together"), "{msg}");
    Ok(())
}

#[test]
fn standard_outputs_cannot_be_redefined() -> TestResult {
    init_tracing();
    let msg = config_error(
        r#"
[scheduling]
initial_point = 1

[task.a]
outputs = { succeeded = "all good" }
"#,
    )?;
    assert!(msg.contains("redefines standard output 'succeeded'"), "{msg}");
    Ok(())
}

#[test]
fn same_point_cycle_is_a_graph_error() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        r#"
[scheduling]
initial_point = 1

[task.a]
after = ["b"]

[task.b]
after = ["a"]
"#,
    )?;

    let err = load_and_validate(&path).err().ok_or("cycle should be rejected")?;

    assert!(matches!(err, SchedulerError::GraphCycle(_)), "{err}");
    Ok(())
}

#[test]
fn malformed_toml_is_a_parse_error() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let path = write_config(&dir, "[scheduling\ninitial_point = 1\n")?;

    let err = load_and_validate(&path).err().ok_or("parse should fail")?;

    assert!(matches!(err, SchedulerError::TomlError(_)), "{err}");
    Ok(())
}
