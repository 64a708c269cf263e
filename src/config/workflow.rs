// src/config/workflow.rs

//! The validated workflow config the scheduler runs from.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cycling::{CyclePoint, Interval, SequenceRef};
use crate::errors::{Result, SchedulerError};
use crate::task::definition::TriggerGroup;
use crate::task::{Prerequisite, TaskDefinition, TaskId};
use crate::types::RunMode;

use super::platform::Platform;

pub const DEFAULT_QUEUE: &str = "default";
pub const ROOT_NAMESPACE: &str = "root";

/// Scheduler-wide settings from `[scheduler]`, with defaults applied.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub workflow_name: String,
    pub run_dir: PathBuf,
    pub job_cmd: Vec<String>,
    pub batch_size: usize,
    pub process_pool_size: usize,
    pub tick: Duration,
    pub db_retries: u32,
    pub db_retry_delay: Duration,
    pub abort_if_stalled: bool,
    pub state_file: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            workflow_name: "workflow".to_string(),
            run_dir: PathBuf::from(".cycler/run"),
            job_cmd: vec!["cycler-job".to_string()],
            batch_size: 100,
            process_pool_size: 4,
            tick: Duration::from_secs(1),
            db_retries: 5,
            db_retry_delay: Duration::from_secs(1),
            abort_if_stalled: false,
            state_file: PathBuf::from(".cycler/run/state.toml"),
        }
    }
}

/// How far ahead of the oldest active point tasks may be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunaheadLimit {
    /// At most this many distinct active cycle points.
    Count(usize),
    /// Up to base point + interval.
    Interval(Interval),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum active members (0 = unlimited).
    pub limit: usize,
    pub members: BTreeSet<String>,
}

/// Maps integer cycle points onto the wall clock for clock triggers and
/// expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointClock {
    pub origin: DateTime<Utc>,
    pub cycle: Duration,
}

impl PointClock {
    pub fn time_of(&self, point: CyclePoint) -> Option<DateTime<Utc>> {
        let cycle = chrono::Duration::from_std(self.cycle).ok()?;
        let offset = cycle.checked_mul(i32::try_from(point.value()).ok()?)?;
        self.origin.checked_add_signed(offset)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub global: GlobalConfig,
    pub initial_point: CyclePoint,
    pub final_point: Option<CyclePoint>,
    pub stop_point: Option<CyclePoint>,
    pub hold_point: Option<CyclePoint>,
    pub runahead_limit: RunaheadLimit,
    pub run_mode: RunMode,
    /// Distinct sequences used by at least one task.
    pub sequences: Vec<SequenceRef>,
    pub queues: BTreeMap<String, QueueConfig>,
    pub taskdefs: BTreeMap<String, Arc<TaskDefinition>>,
    pub platforms: BTreeMap<String, Platform>,
    /// `None` when the workflow has no wall-clock mapping.
    pub clock: Option<PointClock>,
    /// Bumped on every reload.
    pub generation: u64,
}

impl WorkflowConfig {
    pub fn get_taskdef(&self, name: &str) -> Result<&Arc<TaskDefinition>> {
        self.taskdefs
            .get(name)
            .ok_or_else(|| SchedulerError::TaskNotFound(name.to_string()))
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.taskdefs.keys().map(String::as_str)
    }

    pub fn platform(&self, name: &str) -> Result<&Platform> {
        self.platforms
            .get(name)
            .ok_or_else(|| SchedulerError::PlatformLookup(format!("no such platform '{name}'")))
    }

    pub fn queue_limit(&self, queue: &str) -> usize {
        self.queues.get(queue).map(|q| q.limit).unwrap_or(0)
    }

    /// Re-stamp every definition with a new generation (used on reload).
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        for tdef in self.taskdefs.values_mut() {
            Arc::make_mut(tdef).generation = generation;
        }
        self
    }

    pub fn is_beyond_final(&self, point: CyclePoint) -> bool {
        self.final_point.map(|f| point > f).unwrap_or(false)
    }

    /// Whether an instance `id` can ever exist in this workflow.
    fn is_valid_instance(&self, id: &TaskId) -> bool {
        id.point >= self.initial_point
            && !self.is_beyond_final(id.point)
            && self
                .taskdefs
                .get(&id.name)
                .map(|d| d.is_on_sequence(id.point))
                .unwrap_or(false)
    }

    fn build_prerequisites(&self, groups: &[TriggerGroup], point: CyclePoint) -> Vec<Prerequisite> {
        let mut out = Vec::new();
        for group in groups {
            let mut prereq = Prerequisite::new(point, group.conditional);
            let mut dropped = false;
            for trigger in &group.triggers {
                let upstream = TaskId::new(trigger.task.clone(), trigger.target_point(point));
                if self.is_valid_instance(&upstream) {
                    prereq.add(upstream, trigger.output.clone());
                } else {
                    dropped = true;
                }
            }
            // A conditional with an out-of-range member can never wait on it;
            // treat the whole group as met.
            if prereq.is_empty() || (group.conditional && dropped) {
                continue;
            }
            out.push(prereq);
        }
        out
    }

    /// `(prerequisites, suicide prerequisites)` of `tdef` at `point`.
    pub fn prerequisites_for(
        &self,
        tdef: &TaskDefinition,
        point: CyclePoint,
    ) -> (Vec<Prerequisite>, Vec<Prerequisite>) {
        (
            self.build_prerequisites(&tdef.triggers, point),
            self.build_prerequisites(&tdef.suicide_triggers, point),
        )
    }

    /// Upstream instances the instance at `point` waits on.
    pub fn parents_of(&self, tdef: &TaskDefinition, point: CyclePoint) -> BTreeSet<TaskId> {
        self.build_prerequisites(&tdef.triggers, point)
            .iter()
            .flat_map(|p| p.upstream_tasks().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn has_parents(&self, tdef: &TaskDefinition, point: CyclePoint) -> bool {
        !self.build_prerequisites(&tdef.triggers, point).is_empty()
    }

    /// Downstream instances keyed by the output of `name` at `point` that
    /// they depend on. Includes suicide triggers.
    pub fn children_of(&self, name: &str, point: CyclePoint) -> BTreeMap<String, Vec<TaskId>> {
        let mut children: BTreeMap<String, Vec<TaskId>> = BTreeMap::new();
        for (child_name, tdef) in &self.taskdefs {
            for trigger in tdef.all_triggers().filter(|t| t.task == name) {
                let child = TaskId::new(child_name.clone(), point - trigger.offset);
                if !self.is_valid_instance(&child) {
                    continue;
                }
                let entry = children.entry(trigger.output.clone()).or_default();
                if !entry.contains(&child) {
                    entry.push(child);
                }
            }
        }
        children
    }
}
