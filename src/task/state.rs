// src/task/state.rs

//! Task status machine.
//!
//! ```text
//! WAITING -> QUEUED -> READY -> SUBMITTED -> RUNNING -> SUCCEEDED
//!                         |          |           `----> FAILED / RETRYING
//!                         `----------+-> SUBMIT_FAILED / SUBMIT_RETRYING
//! WAITING -> EXPIRED
//! ```
//!
//! `is_held` is orthogonal to the status.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cycling::CyclePoint;

use super::outputs::{
    OUTPUT_EXPIRED, OUTPUT_FAILED, OUTPUT_STARTED, OUTPUT_SUBMIT_FAILED, OUTPUT_SUBMITTED,
    OUTPUT_SUCCEEDED,
};
use super::prerequisite::{OutputRef, Prerequisite};
use super::TaskOutputs;

/// Declaration order is the progression order used by status comparisons.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Waiting,
    Expired,
    Queued,
    Ready,
    SubmitFailed,
    SubmitRetrying,
    Submitted,
    Retrying,
    Running,
    Failed,
    Succeeded,
}

impl TaskStatus {
    /// Statuses with a job (or job submission) in flight.
    pub const ACTIVE: [TaskStatus; 3] =
        [TaskStatus::Ready, TaskStatus::Submitted, TaskStatus::Running];

    /// Terminal statuses: the instance is done for good.
    pub const FINISHED: [TaskStatus; 3] =
        [TaskStatus::Succeeded, TaskStatus::Failed, TaskStatus::Expired];

    pub const FAILURE: [TaskStatus; 2] = [TaskStatus::Failed, TaskStatus::SubmitFailed];

    /// While any instance has one of these, the workflow is not stalled.
    pub const NOT_STALLED: [TaskStatus; 6] = [
        TaskStatus::Queued,
        TaskStatus::Ready,
        TaskStatus::Submitted,
        TaskStatus::Running,
        TaskStatus::Retrying,
        TaskStatus::SubmitRetrying,
    ];

    pub const ALL: [TaskStatus; 11] = [
        TaskStatus::Waiting,
        TaskStatus::Expired,
        TaskStatus::Queued,
        TaskStatus::Ready,
        TaskStatus::SubmitFailed,
        TaskStatus::SubmitRetrying,
        TaskStatus::Submitted,
        TaskStatus::Retrying,
        TaskStatus::Running,
        TaskStatus::Failed,
        TaskStatus::Succeeded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Expired => "expired",
            TaskStatus::Queued => "queued",
            TaskStatus::Ready => "ready",
            TaskStatus::SubmitFailed => "submit-failed",
            TaskStatus::SubmitRetrying => "submit-retrying",
            TaskStatus::Submitted => "submitted",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Running => "running",
            TaskStatus::Failed => "failed",
            TaskStatus::Succeeded => "succeeded",
        }
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_finished(self) -> bool {
        Self::FINISHED.contains(&self)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        TaskStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown task status '{s}'"))
    }
}

#[derive(Debug, Clone)]
pub struct TaskState {
    pub status: TaskStatus,
    pub is_held: bool,
    pub prerequisites: Vec<Prerequisite>,
    pub suicide_prerequisites: Vec<Prerequisite>,
    pub outputs: TaskOutputs,
    /// External trigger label -> satisfied.
    pub xtriggers: BTreeMap<String, bool>,
    /// `None` when the task has no wall-clock trigger.
    pub clock_trigger: Option<bool>,
    pub kill_failed: bool,
    /// Set on every change; cleared when the change is persisted.
    pub is_updated: bool,
}

impl TaskState {
    pub fn new(
        status: TaskStatus,
        is_held: bool,
        prerequisites: Vec<Prerequisite>,
        suicide_prerequisites: Vec<Prerequisite>,
        outputs: TaskOutputs,
    ) -> Self {
        Self {
            status,
            is_held,
            prerequisites,
            suicide_prerequisites,
            outputs,
            xtriggers: BTreeMap::new(),
            clock_trigger: None,
            kill_failed: false,
            is_updated: false,
        }
    }

    /// True if the status is any of `statuses`.
    pub fn is(&self, statuses: &[TaskStatus]) -> bool {
        statuses.contains(&self.status)
    }

    /// Match on status set and (optionally) held flag.
    pub fn matches(&self, statuses: &[TaskStatus], is_held: Option<bool>) -> bool {
        (statuses.is_empty() || self.is(statuses))
            && is_held.map(|h| h == self.is_held).unwrap_or(true)
    }

    /// Change status and/or held flag. Returns whether anything changed.
    ///
    /// Standard outputs are rewritten to agree with the new status unless the
    /// call is holding the task.
    pub fn reset(&mut self, status: Option<TaskStatus>, is_held: Option<bool>) -> bool {
        let requested = (
            status.unwrap_or(self.status),
            is_held.unwrap_or(self.is_held),
        );
        if requested == (self.status, self.is_held) {
            return false;
        }
        self.status = requested.0;
        self.is_held = requested.1;
        self.is_updated = true;

        if is_held == Some(true) {
            return true;
        }
        self.kill_failed = false;

        if let Some(status) = status {
            if status <= TaskStatus::Submitted {
                self.outputs.set_all_incomplete();
            }
            self.outputs
                .set_completion(OUTPUT_EXPIRED, status == TaskStatus::Expired);
            self.outputs
                .set_completion(OUTPUT_SUBMITTED, status >= TaskStatus::Submitted);
            self.outputs
                .set_completion(OUTPUT_STARTED, status >= TaskStatus::Running);
            self.outputs
                .set_completion(OUTPUT_SUBMIT_FAILED, status == TaskStatus::SubmitFailed);
            self.outputs
                .set_completion(OUTPUT_SUCCEEDED, status == TaskStatus::Succeeded);
            self.outputs
                .set_completion(OUTPUT_FAILED, status == TaskStatus::Failed);
        }
        true
    }

    pub fn prerequisites_all_satisfied(&self) -> bool {
        self.prerequisites.iter().all(Prerequisite::is_satisfied)
    }

    /// False when there are no suicide prerequisites at all.
    pub fn suicide_prerequisites_all_satisfied(&self) -> bool {
        !self.suicide_prerequisites.is_empty()
            && self
                .suicide_prerequisites
                .iter()
                .all(Prerequisite::is_satisfied)
    }

    pub fn set_prerequisites_all_satisfied(&mut self) {
        for p in self.prerequisites.iter_mut() {
            p.set_satisfied();
        }
    }

    pub fn set_prerequisites_not_satisfied(&mut self) {
        for p in self.prerequisites.iter_mut() {
            p.set_not_satisfied();
        }
    }

    /// Apply upstream outputs to normal and suicide prerequisites.
    pub fn satisfy_me(&mut self, outputs: &BTreeSet<OutputRef>) -> BTreeSet<OutputRef> {
        let mut used = BTreeSet::new();
        for p in self
            .prerequisites
            .iter_mut()
            .chain(self.suicide_prerequisites.iter_mut())
        {
            used.extend(p.satisfy_me(outputs));
        }
        used
    }

    pub fn prerequisite_target_points(&self) -> BTreeSet<CyclePoint> {
        self.prerequisites
            .iter()
            .flat_map(Prerequisite::target_points)
            .collect()
    }

    pub fn xtriggers_all_satisfied(&self) -> bool {
        self.xtriggers.values().all(|s| *s)
    }

    /// Everything except the job itself: prerequisites, clock, xtriggers.
    pub fn is_ready_to_run(&self) -> bool {
        self.prerequisites_all_satisfied()
            && self.clock_trigger.unwrap_or(true)
            && self.xtriggers_all_satisfied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(status: TaskStatus, is_held: bool) -> TaskState {
        TaskState::new(
            status,
            is_held,
            Vec::new(),
            Vec::new(),
            TaskOutputs::new(&BTreeMap::new()),
        )
    }

    #[test]
    fn reset_reports_changes_and_sets_outputs() {
        // (initial, requested, should_change, expected completed outputs)
        let cases: Vec<(
            (TaskStatus, bool),
            (Option<TaskStatus>, Option<bool>),
            bool,
            Vec<&str>,
        )> = vec![
            ((TaskStatus::Waiting, false), (None, Some(false)), false, vec![]),
            ((TaskStatus::Waiting, true), (None, Some(false)), true, vec![]),
            (
                (TaskStatus::Waiting, false),
                (Some(TaskStatus::Succeeded), Some(false)),
                true,
                vec!["submitted", "started", "succeeded"],
            ),
            (
                (TaskStatus::Waiting, false),
                (Some(TaskStatus::Succeeded), Some(true)),
                true,
                vec![],
            ),
            (
                (TaskStatus::Waiting, false),
                (Some(TaskStatus::Failed), None),
                true,
                vec!["submitted", "started", "failed"],
            ),
            (
                (TaskStatus::Waiting, false),
                (Some(TaskStatus::Running), None),
                true,
                vec!["submitted", "started"],
            ),
            (
                (TaskStatus::Running, false),
                (Some(TaskStatus::SubmitFailed), None),
                true,
                vec!["submit-failed"],
            ),
        ];

        for (initial, requested, should_change, expected) in cases {
            let mut state = fresh(initial.0, initial.1);
            let changed = state.reset(requested.0, requested.1);
            assert_eq!(changed, should_change, "{initial:?} -> {requested:?}");
            assert_eq!(
                state.outputs.completed_labels(),
                expected,
                "{initial:?} -> {requested:?}"
            );
        }
    }

    #[test]
    fn status_order_follows_progression() {
        assert!(TaskStatus::Waiting < TaskStatus::Queued);
        assert!(TaskStatus::Submitted < TaskStatus::Running);
        assert!(TaskStatus::Failed < TaskStatus::Succeeded);
        assert_eq!("submit-retrying".parse(), Ok(TaskStatus::SubmitRetrying));
        assert!("unheard-of".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn matches_status_and_held() {
        let state = fresh(TaskStatus::Queued, true);
        assert!(state.matches(&[TaskStatus::Queued], Some(true)));
        assert!(!state.matches(&[TaskStatus::Queued], Some(false)));
        assert!(state.matches(&[], None));
        assert!(!state.matches(&TaskStatus::ACTIVE, None));
    }

    #[test]
    fn readiness_needs_clock_and_xtriggers() {
        let mut state = fresh(TaskStatus::Waiting, false);
        assert!(state.is_ready_to_run());
        state.clock_trigger = Some(false);
        assert!(!state.is_ready_to_run());
        state.clock_trigger = Some(true);
        state.xtriggers.insert("data".into(), false);
        assert!(!state.is_ready_to_run());
        state.xtriggers.insert("data".into(), true);
        assert!(state.is_ready_to_run());
    }
}
