// src/config/model.rs

//! TOML-backed data model for workflow configs.
//!
//! ```toml
//! [scheduler]
//! run_dir = "run"
//!
//! [scheduling]
//! initial_point = 1
//! final_point = 10
//! max_active_cycle_points = 3
//!
//! [queues.big]
//! limit = 2
//! members = ["a", "b", "c"]
//!
//! [task.b]
//! after = ["a", "b[-P1]:succeeded"]
//!
//! [runtime.b]
//! script = "echo b"
//! execution_retry_delays = ["2*PT10S"]
//! ```
//!
//! Everything here is the raw, unvalidated shape. [`super::WorkflowConfig`]
//! is built from it via `TryFrom` in `validate.rs`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::RunMode;

/// Top-level configuration as read from a TOML file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawWorkflowConfig {
    /// Scheduler-wide knobs from `[scheduler]`.
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Cycling setup from `[scheduling]`.
    #[serde(default)]
    pub scheduling: SchedulingSection,

    /// Named limited queues from `[queues.<name>]`.
    #[serde(default)]
    pub queues: BTreeMap<String, QueueSection>,

    /// Task graph entries from `[task.<name>]`.
    #[serde(default)]
    pub task: BTreeMap<String, TaskSection>,

    /// Runtime namespaces (tasks and families) from `[runtime.<name>]`.
    #[serde(default)]
    pub runtime: BTreeMap<String, RuntimeSection>,

    /// Job platforms from `[platforms.<name>]`.
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformSection>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SchedulerSection {
    pub workflow_name: Option<String>,
    /// Directory for job files and the state file.
    pub run_dir: Option<String>,
    /// Command (argv prefix) used to invoke the job utilities.
    pub job_cmd: Option<Vec<String>>,
    /// Maximum number of jobs per submit/poll/kill command.
    pub batch_size: Option<usize>,
    /// Maximum concurrent subprocesses.
    pub process_pool_size: Option<usize>,
    /// Main loop interval.
    pub tick: Option<String>,
    pub db_retries: Option<u32>,
    pub db_retry_delay: Option<String>,
    pub abort_if_stalled: Option<bool>,
    /// State file, relative to `run_dir`.
    pub state_file: Option<String>,
}

/// `[scheduling]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SchedulingSection {
    pub initial_point: Option<i64>,
    pub final_point: Option<i64>,
    pub stop_point: Option<i64>,
    pub hold_point: Option<i64>,
    /// Count-based runahead limit.
    pub max_active_cycle_points: Option<usize>,
    /// Interval-based runahead limit, e.g. `"P4"`.
    pub runahead_limit: Option<String>,
    pub run_mode: Option<RunMode>,
    /// Limit for the implicit `default` queue (0 = unlimited).
    pub default_queue_limit: Option<usize>,
    /// RFC 3339 wall-clock time of cycle point 0.
    pub clock_origin: Option<String>,
    /// Wall-clock length of one unit of cycle point, e.g. `"1h"`.
    pub clock_cycle: Option<String>,
    /// Named sequences; tasks without `sequences` use every point from the
    /// initial point onward.
    #[serde(default)]
    pub sequences: BTreeMap<String, SequenceSection>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SequenceSection {
    /// Defaults to the initial point.
    pub start: Option<i64>,
    #[serde(default = "default_step")]
    pub step: i64,
    pub end: Option<i64>,
}

fn default_step() -> i64 {
    1
}

/// `[queues.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueueSection {
    /// Maximum active members (0 = unlimited).
    #[serde(default)]
    pub limit: usize,
    /// Task or family names.
    #[serde(default)]
    pub members: Vec<String>,
}

/// `[task.<name>]` section: where a task sits in the graph.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskSection {
    /// Names of sequences from `[scheduling.sequences]`.
    #[serde(default)]
    pub sequences: Vec<String>,

    /// Triggers that must all be met. Each entry is `name[offset]:output`,
    /// with offset and output optional (`foo`, `foo[-P1]`, `foo:failed`).
    #[serde(default)]
    pub after: Vec<String>,

    /// Each inner list is a prerequisite met by any one of its triggers.
    #[serde(default)]
    pub after_any: Vec<Vec<String>>,

    /// Triggers that remove the task from the pool when all are met.
    #[serde(default)]
    pub suicide: Vec<String>,

    /// Custom outputs: label -> message.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,

    /// External trigger labels that must be satisfied before submission.
    #[serde(default)]
    pub xtriggers: Vec<String>,

    /// Wall-clock trigger offset relative to the task's cycle point.
    pub clock_offset: Option<String>,

    /// Expire the task if the wall clock passes point + offset before it runs.
    pub expire_offset: Option<String>,
}

/// `[runtime.<namespace>]` section.
///
/// Also the payload of a broadcast, where every field overrides the task's
/// resolved runtime.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RuntimeSection {
    /// Parent family; `root` when unset.
    pub inherit: Option<String>,
    pub script: Option<String>,
    pub init_script: Option<String>,
    pub env_script: Option<String>,
    pub pre_script: Option<String>,
    pub post_script: Option<String>,
    pub err_script: Option<String>,
    pub exit_script: Option<String>,
    /// Platform name, or `$(cmd)` / `` `cmd` `` to select one at submit time.
    pub platform: Option<String>,
    pub run_mode: Option<RunMode>,
    pub execution_retry_delays: Option<Vec<String>>,
    pub submission_retry_delays: Option<Vec<String>>,
    pub execution_time_limit: Option<String>,
    pub submission_polling_intervals: Option<Vec<String>>,
    pub execution_polling_intervals: Option<Vec<String>>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub directives: BTreeMap<String, String>,
    pub simulation: Option<SimulationSection>,
    pub skip: Option<SkipSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SimulationSection {
    pub run_length: Option<String>,
    pub fail_cycle_points: Option<Vec<i64>>,
    pub fail_try_1_only: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SkipSection {
    /// Outputs to complete in skip mode (`failed` makes the task fail).
    pub outputs: Option<Vec<String>>,
}

impl RuntimeSection {
    /// Overlay `other` on top of `self`: set fields in `other` win.
    pub fn merge_from(&mut self, other: &RuntimeSection) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field.clone();
                })*
            };
        }
        take!(
            script,
            init_script,
            env_script,
            pre_script,
            post_script,
            err_script,
            exit_script,
            platform,
            run_mode,
            execution_retry_delays,
            submission_retry_delays,
            execution_time_limit,
            submission_polling_intervals,
            execution_polling_intervals
        );
        self.environment
            .extend(other.environment.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.directives
            .extend(other.directives.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(sim) = &other.simulation {
            let mine = self.simulation.get_or_insert_with(SimulationSection::default);
            if sim.run_length.is_some() {
                mine.run_length = sim.run_length.clone();
            }
            if sim.fail_cycle_points.is_some() {
                mine.fail_cycle_points = sim.fail_cycle_points.clone();
            }
            if sim.fail_try_1_only.is_some() {
                mine.fail_try_1_only = sim.fail_try_1_only;
            }
        }
        if let Some(skip) = &other.skip {
            if skip.outputs.is_some() {
                self.skip = Some(skip.clone());
            }
        }
    }
}

/// `[platforms.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlatformSection {
    #[serde(default)]
    pub hosts: Vec<String>,
    pub owner: Option<String>,
    pub job_runner: Option<String>,
    pub install_target: Option<String>,
    pub ssh_command: Option<String>,
    pub submission_retry_delays: Option<Vec<String>>,
    pub submission_polling_intervals: Option<Vec<String>>,
    pub execution_polling_intervals: Option<Vec<String>>,
    pub execution_time_limit_polling_intervals: Option<Vec<String>>,
}
