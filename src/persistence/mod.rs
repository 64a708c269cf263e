// src/persistence/mod.rs

//! Workflow state persistence.
//!
//! The scheduler queues row operations ([`DbOp`]) as things happen and
//! flushes them once per main loop iteration through the
//! [`WorkflowDbManager`]. Stores implement [`StateStore`]; the in-memory
//! store backs tests and the file store, which snapshots to TOML for
//! restarts.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cycling::CyclePoint;
use crate::task::TaskStatus;

pub mod file;
pub mod manager;
pub mod memory;

pub use file::FileStore;
pub use manager::WorkflowDbManager;
pub use memory::MemoryStore;

/// Row in the task state history and the current task pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStateRow {
    pub cycle: CyclePoint,
    pub name: String,
    pub submit_num: u32,
    pub status: TaskStatus,
    pub is_held: bool,
    pub flow_label: String,
    pub time_updated: DateTime<Utc>,
}

/// One job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskJobRow {
    pub cycle: CyclePoint,
    pub name: String,
    pub submit_num: u32,
    pub try_num: usize,
    pub run_mode: String,
    pub platform_name: String,
    pub job_runner_name: String,
    pub job_id: Option<String>,
    pub submit_status: Option<i32>,
    pub run_status: Option<i32>,
    pub run_signal: Option<String>,
    pub time_submit: Option<DateTime<Utc>>,
    pub time_submit_exit: Option<DateTime<Utc>>,
    pub time_run: Option<DateTime<Utc>>,
    pub time_run_exit: Option<DateTime<Utc>>,
}

/// Partial update of a job row: `Some` fields overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskJobUpdate {
    pub cycle: CyclePoint,
    pub name: String,
    pub submit_num: u32,
    pub job_id: Option<String>,
    pub submit_status: Option<i32>,
    pub run_status: Option<i32>,
    pub run_signal: Option<String>,
    pub time_submit_exit: Option<DateTime<Utc>>,
    pub time_run: Option<DateTime<Utc>>,
    pub time_run_exit: Option<DateTime<Utc>>,
}

impl TaskJobUpdate {
    pub fn new(cycle: CyclePoint, name: impl Into<String>, submit_num: u32) -> Self {
        Self {
            cycle,
            name: name.into(),
            submit_num,
            job_id: None,
            submit_status: None,
            run_status: None,
            run_signal: None,
            time_submit_exit: None,
            time_run: None,
            time_run_exit: None,
        }
    }
}

/// Completed output messages of a task instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutputsRow {
    pub cycle: CyclePoint,
    pub name: String,
    pub outputs: Vec<String>,
}

/// A retry or poll timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTimerRow {
    pub cycle: CyclePoint,
    pub name: String,
    pub ctx_key: String,
    pub num: usize,
    pub delay_secs: Option<f64>,
    pub timeout: Option<DateTime<Utc>>,
}

/// Joined view used to rebuild the pool on restart.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPoolRow {
    pub cycle: CyclePoint,
    pub name: String,
    pub submit_num: u32,
    pub status: TaskStatus,
    pub is_held: bool,
    pub flow_label: String,
    pub platform_name: Option<String>,
    pub job_runner_name: Option<String>,
    pub job_id: Option<String>,
    pub time_submit: Option<DateTime<Utc>>,
    pub time_run: Option<DateTime<Utc>>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DbOp {
    InsertTaskState(TaskStateRow),
    UpdateTaskState(TaskStateRow),
    /// Drop an instance from the current pool (history is kept).
    RemoveFromPool { cycle: CyclePoint, name: String },
    InsertTaskJob(TaskJobRow),
    UpdateTaskJob(TaskJobUpdate),
    UpdateTaskOutputs(TaskOutputsRow),
    PutTaskTimer(TaskTimerRow),
}

/// Full serialisable contents of a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub task_states: Vec<TaskStateRow>,
    #[serde(default)]
    pub task_pool: Vec<TaskStateRow>,
    #[serde(default)]
    pub task_jobs: Vec<TaskJobRow>,
    #[serde(default)]
    pub task_outputs: Vec<TaskOutputsRow>,
    #[serde(default)]
    pub task_timers: Vec<TaskTimerRow>,
}

impl StoreSnapshot {
    /// Current pool joined with each instance's latest job and outputs.
    pub fn task_pool_rows(&self) -> Vec<TaskPoolRow> {
        let jobs: BTreeMap<(CyclePoint, &str, u32), &TaskJobRow> = self
            .task_jobs
            .iter()
            .map(|j| ((j.cycle, j.name.as_str(), j.submit_num), j))
            .collect();
        let outputs: BTreeMap<(CyclePoint, &str), &TaskOutputsRow> = self
            .task_outputs
            .iter()
            .map(|o| ((o.cycle, o.name.as_str()), o))
            .collect();

        self.task_pool
            .iter()
            .map(|s| {
                let job = jobs.get(&(s.cycle, s.name.as_str(), s.submit_num));
                TaskPoolRow {
                    cycle: s.cycle,
                    name: s.name.clone(),
                    submit_num: s.submit_num,
                    status: s.status,
                    is_held: s.is_held,
                    flow_label: s.flow_label.clone(),
                    platform_name: job.map(|j| j.platform_name.clone()),
                    job_runner_name: job.map(|j| j.job_runner_name.clone()),
                    job_id: job.and_then(|j| j.job_id.clone()),
                    time_submit: job.and_then(|j| j.time_submit),
                    time_run: job.and_then(|j| j.time_run),
                    outputs: outputs
                        .get(&(s.cycle, s.name.as_str()))
                        .map(|o| o.outputs.clone())
                        .unwrap_or_default(),
                }
            })
            .collect()
    }
}

/// A place workflow state rows are written to.
pub trait StateStore: Send + fmt::Debug {
    /// Apply a batch of operations, all or nothing.
    fn apply(&mut self, ops: &[DbOp]) -> anyhow::Result<()>;

    fn snapshot(&self) -> anyhow::Result<StoreSnapshot>;

    /// Replace the whole contents.
    fn restore(&mut self, snapshot: StoreSnapshot) -> anyhow::Result<()>;
}
