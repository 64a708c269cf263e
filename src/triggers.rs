// src/triggers.rs

//! Wall-clock and external triggers.
//!
//! The pool does not evaluate triggers itself. Each iteration the scheduler
//! asks a [`TriggerOracle`] whether the still-unsatisfied conditions of
//! waiting instances now hold, and which waiting instances have expired.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::{PointClock, WorkflowConfig};
use crate::cycling::CyclePoint;
use crate::pool::TaskPool;
use crate::task::{TaskId, TaskStatus};

/// Answers trigger queries for task instances.
pub trait TriggerOracle: Send + fmt::Debug {
    /// Is the external trigger `label` satisfied for this instance?
    fn xtrigger_satisfied(&mut self, label: &str, id: &TaskId, now: DateTime<Utc>) -> bool;

    /// Wall-clock time of a cycle point, or `None` if points have no
    /// wall-clock meaning.
    fn wall_clock_of(&self, point: CyclePoint) -> Option<DateTime<Utc>>;

    /// Mark an external trigger satisfied, for all points if `point` is
    /// `None`.
    fn satisfy_xtrigger(&mut self, label: &str, point: Option<CyclePoint>);

    /// Pick up settings from a reloaded workflow config.
    fn on_reload(&mut self, _config: &WorkflowConfig) {}
}

/// Default oracle: external triggers are satisfied by operator command,
/// wall-clock times come from the workflow's point clock.
#[derive(Debug, Clone, Default)]
pub struct ClockOracle {
    clock: Option<PointClock>,
    satisfied: BTreeSet<(String, Option<CyclePoint>)>,
}

impl ClockOracle {
    pub fn new(clock: Option<PointClock>) -> Self {
        Self {
            clock,
            satisfied: BTreeSet::new(),
        }
    }
}

impl TriggerOracle for ClockOracle {
    fn xtrigger_satisfied(&mut self, label: &str, id: &TaskId, _now: DateTime<Utc>) -> bool {
        self.satisfied.contains(&(label.to_string(), None))
            || self.satisfied.contains(&(label.to_string(), Some(id.point)))
    }

    fn wall_clock_of(&self, point: CyclePoint) -> Option<DateTime<Utc>> {
        self.clock.as_ref().and_then(|c| c.time_of(point))
    }

    fn satisfy_xtrigger(&mut self, label: &str, point: Option<CyclePoint>) {
        self.satisfied.insert((label.to_string(), point));
    }

    fn on_reload(&mut self, config: &WorkflowConfig) {
        self.clock = config.clock;
    }
}

/// Re-check unsatisfied clock and external triggers of waiting instances in
/// the main pool. Returns true if any changed.
///
/// Without a wall-clock mapping a clock trigger is satisfied at once.
pub fn update_trigger_states(
    pool: &mut TaskPool,
    oracle: &mut dyn TriggerOracle,
    now: DateTime<Utc>,
) -> bool {
    let mut changed = false;
    for id in pool.task_ids_with(&[TaskStatus::Waiting]) {
        let Some(itask) = pool.get_task_mut(&id) else {
            continue;
        };
        if itask.state.clock_trigger == Some(false) {
            let offset = itask.tdef.clock_offset.unwrap_or_default();
            let due = oracle.wall_clock_of(itask.point() + offset);
            if due.is_none_or(|t| t <= now) {
                debug!(task = %id, "clock trigger satisfied");
                itask.state.clock_trigger = Some(true);
                changed = true;
            }
        }
        let pending: Vec<String> = itask
            .state
            .xtriggers
            .iter()
            .filter(|(_, done)| !**done)
            .map(|(label, _)| label.clone())
            .collect();
        for label in pending {
            if oracle.xtrigger_satisfied(&label, &id, now) {
                info!(task = %id, xtrigger = %label, "xtrigger satisfied");
                itask.state.xtriggers.insert(label, true);
                changed = true;
            }
        }
    }
    changed
}

/// Unheld waiting instances whose point plus expiry offset lies in the past.
pub fn find_expired_tasks(
    pool: &TaskPool,
    oracle: &dyn TriggerOracle,
    now: DateTime<Utc>,
) -> Vec<TaskId> {
    pool.get_tasks()
        .filter(|itask| itask.state.matches(&[TaskStatus::Waiting], Some(false)))
        .filter_map(|itask| {
            let offset = itask.tdef.expire_offset?;
            let expires = oracle.wall_clock_of(itask.point() + offset)?;
            (expires < now).then(|| itask.identity.clone())
        })
        .collect()
}
