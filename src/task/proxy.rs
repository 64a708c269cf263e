// src/task/proxy.rs

//! A live task instance: one task definition at one cycle point.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::platform::Platform;
use crate::config::workflow::WorkflowConfig;
use crate::cycling::CyclePoint;
use crate::types::RunMode;

use super::outputs::TaskOutputs;
use super::{JobRef, TaskActionTimer, TaskDefinition, TaskId, TaskState, TaskStatus};

/// Which kind of retry a timer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RetryPhase {
    Submission,
    Execution,
}

impl RetryPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryPhase::Submission => "submission-retry",
            RetryPhase::Execution => "execution-retry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submission-retry" => Some(RetryPhase::Submission),
            "execution-retry" => Some(RetryPhase::Execution),
            _ => None,
        }
    }
}

/// Job-related facts about the latest submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSummary {
    pub submitted_time: Option<DateTime<Utc>>,
    pub started_time: Option<DateTime<Utc>>,
    pub finished_time: Option<DateTime<Utc>>,
    /// Latest status message shown to operators.
    pub latest_message: Option<String>,
    pub job_runner_name: Option<String>,
    pub job_id: Option<String>,
    pub execution_time_limit: Option<Duration>,
    pub run_signal: Option<String>,
    /// Platform name per submit number.
    pub platforms_used: BTreeMap<u32, String>,
}

#[derive(Debug, Clone)]
pub struct TaskProxy {
    pub tdef: Arc<TaskDefinition>,
    pub identity: TaskId,
    pub state: TaskState,
    pub submit_num: u32,
    pub flow_label: String,
    /// One-shot: run once regardless of prerequisites and queue limits.
    pub manual_trigger: bool,
    pub platform: Option<Platform>,
    /// Run mode used for the latest submission.
    pub run_mode: Option<RunMode>,
    /// Job log references, one per submission.
    pub jobs: Vec<String>,
    /// Upstream instance -> has it finished (and been removed).
    pub parents: BTreeMap<TaskId, bool>,
    /// Output label -> downstream instances that depend on it.
    pub children: BTreeMap<String, Vec<TaskId>>,
    pub try_timers: BTreeMap<RetryPhase, TaskActionTimer>,
    pub poll_timer: Option<TaskActionTimer>,
    pub summary: TaskSummary,
    /// Set between job file preparation and the submit command going out.
    pub local_job_file_path: Option<PathBuf>,
    /// Instance-level stop point; the instance is not spawned beyond it.
    pub stop_point: Option<CyclePoint>,
}

impl TaskProxy {
    pub fn new(
        tdef: Arc<TaskDefinition>,
        point: CyclePoint,
        config: &WorkflowConfig,
        status: TaskStatus,
        is_held: bool,
        flow_label: impl Into<String>,
    ) -> Self {
        let (prerequisites, suicide_prerequisites) = config.prerequisites_for(&tdef, point);
        let mut state = TaskState::new(
            status,
            is_held,
            prerequisites,
            suicide_prerequisites,
            TaskOutputs::new(&tdef.outputs),
        );
        for label in &tdef.xtriggers {
            state.xtriggers.insert(label.clone(), false);
        }
        if tdef.clock_offset.is_some() {
            state.clock_trigger = Some(false);
        }
        let parents = config
            .parents_of(&tdef, point)
            .into_iter()
            .map(|p| (p, false))
            .collect();
        let children = config.children_of(&tdef.name, point);

        Self {
            identity: TaskId::new(tdef.name.clone(), point),
            tdef,
            state,
            submit_num: 0,
            flow_label: flow_label.into(),
            manual_trigger: false,
            platform: None,
            run_mode: None,
            jobs: Vec::new(),
            parents,
            children,
            try_timers: BTreeMap::new(),
            poll_timer: None,
            summary: TaskSummary::default(),
            local_job_file_path: None,
            stop_point: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn point(&self) -> CyclePoint {
        self.identity.point
    }

    /// Execution attempt number, 1-based.
    pub fn try_num(&self) -> usize {
        self.try_timers
            .get(&RetryPhase::Execution)
            .map(|t| t.num)
            .unwrap_or(0)
            + 1
    }

    pub fn job_ref(&self) -> JobRef {
        JobRef::new(&self.identity, self.submit_num)
    }

    /// `<run_dir>/log/job/<point>/<name>/<NN>`
    pub fn job_log_dir(&self, run_dir: &Path) -> PathBuf {
        run_dir
            .join("log")
            .join("job")
            .join(self.point().to_string())
            .join(self.name())
            .join(format!("{:02}", self.submit_num))
    }

    /// Install retry delay lists, keeping how many retries were used.
    pub fn set_retry_delays(&mut self, execution: Vec<Duration>, submission: Vec<Duration>) {
        for (phase, delays) in [
            (RetryPhase::Execution, execution),
            (RetryPhase::Submission, submission),
        ] {
            self.try_timers.entry(phase).or_default().set_delays(delays);
        }
    }

    /// Can this instance move into its queue now?
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        if self.state.is_held {
            return false;
        }
        if self.manual_trigger {
            return true;
        }
        match self.state.status {
            TaskStatus::Waiting => self.state.is_ready_to_run(),
            TaskStatus::Retrying => self.retry_delay_done(RetryPhase::Execution, now),
            TaskStatus::SubmitRetrying => self.retry_delay_done(RetryPhase::Submission, now),
            _ => false,
        }
    }

    fn retry_delay_done(&self, phase: RetryPhase, now: DateTime<Utc>) -> bool {
        self.try_timers
            .get(&phase)
            .map(|t| t.is_delay_done(now))
            .unwrap_or(true)
    }

    /// Set the summary message and report whether it changed.
    pub fn set_summary_message(&mut self, message: &str) -> bool {
        if self.summary.latest_message.as_deref() == Some(message) {
            return false;
        }
        self.summary.latest_message = Some(message.to_string());
        true
    }

    /// Carry runtime state over from the instance this one replaces after a
    /// reload. Prerequisites and outputs are matched by name; ones that no
    /// longer exist are dropped.
    pub fn copy_state_from(&mut self, old: &TaskProxy) {
        self.state.status = old.state.status;
        self.state.is_held = old.state.is_held;
        self.state.kill_failed = old.state.kill_failed;
        self.state.clock_trigger = match (self.state.clock_trigger, old.state.clock_trigger) {
            (Some(_), Some(done)) => Some(done),
            (mine, _) => mine,
        };
        for (label, done) in old.state.xtriggers.iter() {
            if let Some(mine) = self.state.xtriggers.get_mut(label) {
                *mine = *done;
            }
        }

        let satisfied: BTreeSet<_> = old
            .state
            .prerequisites
            .iter()
            .chain(old.state.suicide_prerequisites.iter())
            .flat_map(|p| p.satisfied_refs())
            .collect();
        self.state.satisfy_me(&satisfied);

        for (label, _, done) in old.state.outputs.all() {
            if done {
                self.state.outputs.set_completion(label, true);
            }
        }
        for (parent, finished) in old.parents.iter() {
            if let Some(mine) = self.parents.get_mut(parent) {
                *mine = *finished;
            }
        }

        self.submit_num = old.submit_num;
        self.flow_label = old.flow_label.clone();
        self.manual_trigger = old.manual_trigger;
        self.platform = old.platform.clone();
        self.run_mode = old.run_mode;
        self.jobs = old.jobs.clone();
        self.try_timers = old.try_timers.clone();
        self.poll_timer = old.poll_timer.clone();
        self.summary = old.summary.clone();
        self.stop_point = old.stop_point;
    }
}
