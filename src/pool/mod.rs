// src/pool/mod.rs

//! The task pool: every live task instance, split into
//!
//! - the runahead pool: instances too far ahead of the oldest unfinished
//!   cycle point to be considered yet, and
//! - the main pool: instances eligible for queueing and submission, each
//!   also registered in exactly one named queue.
//!
//! Submodules hold the operations:
//! - [`runahead`]: `release_runahead_tasks`
//! - [`queues`]: `get_ready_tasks`
//! - [`removal`]: finished/suicide removal, stall detection, stop checks
//! - [`commands`]: operator hold/release/trigger/stop point/reload
//! - [`restart`]: rebuilding the pool from persisted rows

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::workflow::{RunaheadLimit, WorkflowConfig, DEFAULT_QUEUE};
use crate::cycling::{CyclePoint, Interval};
use crate::errors::{Result, SchedulerError};
use crate::persistence::WorkflowDbManager;
use crate::task::outputs::OUTPUT_EXPIRED;
use crate::task::prerequisite::OutputRef;
use crate::task::{TaskId, TaskProxy, TaskStatus};

pub mod commands;
pub mod queues;
pub mod removal;
pub mod restart;
pub mod runahead;

pub use queues::TaskQueue;

type PointMap = BTreeMap<CyclePoint, BTreeMap<TaskId, TaskProxy>>;

#[derive(Debug)]
pub struct TaskPool {
    config: Arc<WorkflowConfig>,
    db: WorkflowDbManager,
    runahead_pool: PointMap,
    main_pool: PointMap,
    queues: BTreeMap<String, TaskQueue>,
    stop_point: Option<CyclePoint>,
    hold_point: Option<CyclePoint>,
    is_held: bool,
    max_future_offset: Option<Interval>,
    /// Base point and reachable points of the last runahead computation.
    runahead_cache: Option<(CyclePoint, BTreeSet<CyclePoint>)>,
    /// Instances that reached a terminal status, awaiting removal.
    finished_tasks: Vec<TaskId>,
    /// Task names dropped by the last reload.
    orphans: Vec<String>,
    flow_counter: u64,
}

impl TaskPool {
    pub fn new(config: Arc<WorkflowConfig>, db: WorkflowDbManager) -> Self {
        let queues = config
            .queues
            .iter()
            .map(|(name, q)| (name.clone(), TaskQueue::new(q.limit)))
            .collect();
        Self {
            stop_point: config.stop_point,
            hold_point: config.hold_point,
            config,
            db,
            runahead_pool: BTreeMap::new(),
            main_pool: BTreeMap::new(),
            queues,
            is_held: false,
            max_future_offset: None,
            runahead_cache: None,
            finished_tasks: Vec::new(),
            orphans: Vec::new(),
            flow_counter: 0,
        }
    }

    pub fn config(&self) -> &Arc<WorkflowConfig> {
        &self.config
    }

    pub fn db(&self) -> &WorkflowDbManager {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut WorkflowDbManager {
        &mut self.db
    }

    pub fn stop_point(&self) -> Option<CyclePoint> {
        self.stop_point
    }

    pub fn hold_point(&self) -> Option<CyclePoint> {
        self.hold_point
    }

    pub fn is_held(&self) -> bool {
        self.is_held
    }

    pub fn max_future_offset(&self) -> Option<Interval> {
        self.max_future_offset
    }

    pub fn orphans(&self) -> &[String] {
        &self.orphans
    }

    pub fn queue(&self, name: &str) -> Option<&TaskQueue> {
        self.queues.get(name)
    }

    fn find_in<'a>(pool: &'a PointMap, id: &TaskId) -> Option<&'a TaskProxy> {
        pool.get(&id.point).and_then(|m| m.get(id))
    }

    fn find_in_mut<'a>(pool: &'a mut PointMap, id: &TaskId) -> Option<&'a mut TaskProxy> {
        pool.get_mut(&id.point).and_then(|m| m.get_mut(id))
    }

    fn take_from(pool: &mut PointMap, id: &TaskId) -> Option<TaskProxy> {
        let tasks = pool.get_mut(&id.point)?;
        let itask = tasks.remove(id);
        if tasks.is_empty() {
            pool.remove(&id.point);
        }
        itask
    }

    fn insert_into(pool: &mut PointMap, itask: TaskProxy) {
        pool.entry(itask.point())
            .or_default()
            .insert(itask.identity.clone(), itask);
    }

    /// Look up an instance in the main pool, then the runahead pool.
    pub fn get_task(&self, id: &TaskId) -> Option<&TaskProxy> {
        Self::find_in(&self.main_pool, id).or_else(|| Self::find_in(&self.runahead_pool, id))
    }

    pub fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut TaskProxy> {
        if Self::find_in(&self.main_pool, id).is_some() {
            return Self::find_in_mut(&mut self.main_pool, id);
        }
        Self::find_in_mut(&mut self.runahead_pool, id)
    }

    pub fn is_in_runahead(&self, id: &TaskId) -> bool {
        Self::find_in(&self.runahead_pool, id).is_some()
    }

    /// Main pool instances, in point then name order.
    pub fn get_tasks(&self) -> impl Iterator<Item = &TaskProxy> {
        self.main_pool.values().flat_map(|m| m.values())
    }

    /// Main and runahead pool instances.
    pub fn get_all_tasks(&self) -> impl Iterator<Item = &TaskProxy> {
        self.get_tasks()
            .chain(self.runahead_pool.values().flat_map(|m| m.values()))
    }

    pub fn get_all_tasks_mut(&mut self) -> impl Iterator<Item = &mut TaskProxy> {
        self.main_pool
            .values_mut()
            .flat_map(|m| m.values_mut())
            .chain(self.runahead_pool.values_mut().flat_map(|m| m.values_mut()))
    }

    /// Ids of main pool instances whose status is one of `statuses`.
    pub fn task_ids_with(&self, statuses: &[TaskStatus]) -> Vec<TaskId> {
        self.get_tasks()
            .filter(|t| t.state.is(statuses))
            .map(|t| t.identity.clone())
            .collect()
    }

    pub fn runahead_ids(&self) -> Vec<TaskId> {
        self.runahead_pool
            .values()
            .flat_map(|m| m.keys().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.main_pool.is_empty() && self.runahead_pool.is_empty()
    }

    pub fn new_flow_label(&mut self) -> String {
        self.flow_counter += 1;
        format!("f{}", self.flow_counter)
    }

    /// Seed the pool at start-up: every task is spawned at its first point
    /// on or after the initial point where it has no upstream dependencies.
    /// Tasks with parents are spawned later by their parents' outputs.
    pub fn load_from_point(&mut self, now: DateTime<Utc>) {
        let config = self.config.clone();
        info!(initial_point = %config.initial_point, "loading task pool from initial point");
        let flow = self.new_flow_label();
        for tdef in config.taskdefs.values() {
            let Some(point) = tdef.first_point(config.initial_point) else {
                continue;
            };
            if config.is_beyond_final(point) || config.has_parents(tdef, point) {
                continue;
            }
            let itask = TaskProxy::new(
                tdef.clone(),
                point,
                &config,
                TaskStatus::Waiting,
                false,
                flow.clone(),
            );
            self.add_to_runahead_pool(itask, true, now);
        }
    }

    /// Add a new instance to the runahead pool.
    ///
    /// Returns `None` (and drops the instance) if it is a duplicate or lies
    /// beyond its own stop point. Instances beyond the hold point, with
    /// prerequisites beyond the stop point, or arriving while the whole
    /// workflow is held, are added held.
    pub fn add_to_runahead_pool(
        &mut self,
        mut itask: TaskProxy,
        is_new: bool,
        now: DateTime<Utc>,
    ) -> Option<TaskId> {
        let id = itask.identity.clone();
        if self.get_task(&id).is_some() {
            warn!(task = %id, "not adding duplicate task instance");
            return None;
        }
        if let Some(stop) = itask.stop_point {
            if id.point > stop {
                info!(task = %id, stop_point = %stop, "not adding task beyond its stop point");
                return None;
            }
        }

        if let Some(hold) = self.hold_point {
            if id.point > hold {
                info!(task = %id, hold_point = %hold, "holding task beyond the hold point");
                itask.state.reset(None, Some(true));
            }
        }
        if !itask.state.is_held && self.has_future_trigger_overrun(&itask) {
            info!(task = %id, "holding task with prerequisites beyond the stop point");
            itask.state.reset(None, Some(true));
        }
        if !itask.state.is_held && self.is_held && itask.state.status == TaskStatus::Waiting {
            info!(task = %id, "holding task added while the workflow is held");
            itask.state.reset(None, Some(true));
        }

        if is_new {
            self.db.put_insert_task_state(&itask, now);
            if itask.state.outputs.custom().next().is_some() {
                self.db.put_update_task_outputs(&itask);
            }
        }
        debug!(task = %id, status = %itask.state.status, "added to runahead pool");
        Self::insert_into(&mut self.runahead_pool, itask);
        Some(id)
    }

    fn has_future_trigger_overrun(&self, itask: &TaskProxy) -> bool {
        let Some(stop) = self.stop_point else {
            return false;
        };
        itask
            .state
            .prerequisite_target_points()
            .into_iter()
            .any(|p| p > stop)
    }

    /// Remove an instance from whichever pool holds it.
    pub fn remove(&mut self, id: &TaskId, reason: &str) -> Option<TaskProxy> {
        let itask = match Self::take_from(&mut self.runahead_pool, id) {
            Some(t) => t,
            None => {
                let t = Self::take_from(&mut self.main_pool, id)?;
                if let Some(queue) = self.queues.get_mut(&t.tdef.queue) {
                    queue.remove(id);
                } else {
                    for queue in self.queues.values_mut() {
                        queue.remove(id);
                    }
                }
                t
            }
        };
        info!(task = %id, status = %itask.state.status, reason, "removed from task pool");
        self.db.put_remove_task(&itask);
        self.finished_tasks.retain(|f| f != id);
        if itask.tdef.max_future_prereq_offset().is_some() {
            self.set_max_future_offset();
        }
        Some(itask)
    }

    /// Largest future trigger offset among main pool instances.
    pub fn set_max_future_offset(&mut self) {
        self.max_future_offset = self
            .get_tasks()
            .filter_map(|t| t.tdef.max_future_prereq_offset())
            .max();
        if let (RunaheadLimit::Interval(limit), Some(offset)) =
            (self.config.runahead_limit, self.max_future_offset)
        {
            if limit < offset {
                warn!(
                    runahead_limit = %limit,
                    future_offset = %offset,
                    "runahead limit is smaller than the largest future trigger offset"
                );
            }
        }
    }

    /// Find or create `name` at `point`, then satisfy it.
    ///
    /// With `go`, every prerequisite is marked satisfied. Otherwise, if a
    /// parent and output are given, the matching prerequisite entries are.
    pub fn spawn(
        &mut self,
        parent: Option<&TaskId>,
        name: &str,
        point: CyclePoint,
        output: Option<&str>,
        go: bool,
        now: DateTime<Utc>,
    ) -> Option<TaskId> {
        let config = self.config.clone();
        if config.is_beyond_final(point) {
            debug!(task = %name, %point, "not spawning beyond the final point");
            return None;
        }
        let id = TaskId::new(name, point);

        if self.get_task(&id).is_none() {
            let Some(tdef) = config.taskdefs.get(name) else {
                warn!(task = %id, "cannot spawn: no such task definition");
                return None;
            };
            if !tdef.is_on_sequence(point) {
                debug!(task = %id, "not spawning: point is not on the task's sequences");
                return None;
            }
            let flow = match parent.and_then(|p| self.get_task(p)) {
                Some(p) => p.flow_label.clone(),
                None => self.new_flow_label(),
            };
            let itask = TaskProxy::new(tdef.clone(), point, &config, TaskStatus::Waiting, false, flow);
            self.add_to_runahead_pool(itask, true, now)?;
            debug!(task = %id, parent = ?parent.map(|p| p.to_string()), "spawned");
        }

        let itask = self.get_task_mut(&id)?;
        if go {
            itask.state.set_prerequisites_all_satisfied();
        } else if let (Some(parent), Some(output)) = (parent, output) {
            let outputs: BTreeSet<OutputRef> = BTreeSet::from([(parent.clone(), output.to_string())]);
            itask.state.satisfy_me(&outputs);
        }
        itask.state.is_updated = true;
        Some(id)
    }

    /// Spawn (or satisfy) every child waiting on `label` of `id`.
    pub fn spawn_on_output(&mut self, id: &TaskId, label: &str, now: DateTime<Utc>) {
        let children = match self.get_task(id) {
            Some(itask) => itask.children.get(label).cloned().unwrap_or_default(),
            None => return,
        };
        for child in children {
            self.spawn(Some(id), &child.name, child.point, Some(label), false, now);
        }
    }

    /// Queue a terminal instance for removal.
    pub fn queue_finished(&mut self, id: &TaskId) {
        if !self.finished_tasks.contains(id) {
            self.finished_tasks.push(id.clone());
        }
    }

    pub fn finished_queue(&self) -> &[TaskId] {
        &self.finished_tasks
    }

    /// Expire a waiting instance whose window has passed.
    pub fn set_expired_task(&mut self, id: &TaskId, now: DateTime<Utc>) -> bool {
        let Some(itask) = self.get_task_mut(id) else {
            return false;
        };
        if !itask.state.matches(&[TaskStatus::Waiting, TaskStatus::Queued], Some(false)) {
            return false;
        }
        warn!(task = %id, "task expired: will not submit job");
        itask.state.reset(Some(TaskStatus::Expired), Some(false));
        itask.set_summary_message(OUTPUT_EXPIRED);
        self.spawn_on_output(id, OUTPUT_EXPIRED, now);
        self.queue_finished(id);
        true
    }

    /// Set a queue's limit.
    pub fn set_queue_limit(&mut self, queue: &str, limit: usize) -> Result<()> {
        let q = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| SchedulerError::UnknownQueue {
                task: "*".to_string(),
                queue: queue.to_string(),
            })?;
        q.limit = limit;
        Ok(())
    }

    /// Queue name for a task, falling back to the default queue.
    fn queue_name_for(&self, itask: &TaskProxy) -> String {
        if self.queues.contains_key(&itask.tdef.queue) {
            itask.tdef.queue.clone()
        } else {
            warn!(
                task = %itask.identity,
                queue = %itask.tdef.queue,
                "unknown queue; using the default queue"
            );
            DEFAULT_QUEUE.to_string()
        }
    }

    /// Record a job row for the current submission of `id`.
    pub fn put_insert_task_job(&mut self, id: &TaskId, now: DateTime<Utc>) {
        let Self {
            main_pool,
            runahead_pool,
            db,
            ..
        } = self;
        if let Some(itask) = Self::find_in(main_pool, id).or_else(|| Self::find_in(runahead_pool, id)) {
            db.put_insert_task_job(itask, now);
        }
    }

    /// Write state, outputs and timers of every changed instance.
    pub fn persist_changes(&mut self, now: DateTime<Utc>) {
        let Self {
            main_pool,
            runahead_pool,
            db,
            ..
        } = self;
        for itask in main_pool
            .values_mut()
            .chain(runahead_pool.values_mut())
            .flat_map(|m| m.values_mut())
            .filter(|t| t.state.is_updated)
        {
            db.put_update_task_state(itask, now);
            db.put_update_task_outputs(itask);
            db.put_task_timers(itask);
            itask.state.is_updated = false;
        }
    }
}
