// src/pool/commands.rs

//! Operator commands against the pool.
//!
//! Commands name instances with items of the form `point/name[:status]`
//! or `name.point[:status]`. Point and name are glob patterns; the name
//! pattern may also match a family in the task's namespace hierarchy.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use tracing::{info, warn};

use crate::config::workflow::{WorkflowConfig, DEFAULT_QUEUE};
use crate::cycling::CyclePoint;
use crate::errors::{Result, SchedulerError};
use crate::task::outputs::{normalise_output_label, OUTPUT_SUCCEEDED};
use crate::task::{TaskId, TaskProxy, TaskStatus};

use super::{TaskPool, TaskQueue};

/// A parsed task selector.
#[derive(Debug, Clone)]
pub struct TaskMatcher {
    item: String,
    point: GlobMatcher,
    name: GlobMatcher,
    status: Option<TaskStatus>,
}

impl TaskMatcher {
    pub fn parse(item: &str) -> Result<Self> {
        let (body, status) = match item.rsplit_once(':') {
            Some((body, status)) => {
                let status = status
                    .parse::<TaskStatus>()
                    .map_err(|e| SchedulerError::ConfigError(format!("{item}: {e}")))?;
                (body, Some(status))
            }
            None => (item, None),
        };
        let (point, name) = if let Some((point, name)) = body.split_once('/') {
            (point, name)
        } else if let Some((name, point)) = body.rsplit_once('.') {
            (point, name)
        } else {
            ("*", body)
        };
        let compile = |pattern: &str| -> Result<GlobMatcher> {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid task selector: {item}"))?;
            Ok(glob.compile_matcher())
        };
        Ok(Self {
            item: item.to_string(),
            point: compile(point)?,
            name: compile(name)?,
            status,
        })
    }

    pub fn matches(&self, itask: &TaskProxy) -> bool {
        if let Some(status) = self.status {
            if itask.state.status != status {
                return false;
            }
        }
        self.point.is_match(itask.point().to_string())
            && (self.name.is_match(itask.name())
                || itask
                    .tdef
                    .namespace_hierarchy
                    .iter()
                    .any(|ns| self.name.is_match(ns)))
    }

    /// The single instance this selector names, if it has no wildcards.
    pub fn exact(&self) -> Option<TaskId> {
        let (point, name) = (self.point.glob().glob(), self.name.glob().glob());
        if [point, name].iter().any(|s| s.contains(['*', '?', '[', '{'])) {
            return None;
        }
        Some(TaskId::new(name, point.parse::<CyclePoint>().ok()?))
    }

    pub fn item(&self) -> &str {
        &self.item
    }
}

impl TaskPool {
    /// Resolve selectors against every instance (main and runahead).
    /// Returns matched ids and the items that matched nothing.
    pub fn filter_task_proxies(&self, items: &[String]) -> (Vec<TaskId>, Vec<String>) {
        let mut matched = Vec::new();
        let mut bad = Vec::new();
        for item in items {
            let matcher = match TaskMatcher::parse(item) {
                Ok(m) => m,
                Err(e) => {
                    warn!(%item, error = %e, "bad task selector");
                    bad.push(item.clone());
                    continue;
                }
            };
            let before = matched.len();
            for itask in self.get_all_tasks().filter(|t| matcher.matches(t)) {
                if !matched.contains(&itask.identity) {
                    matched.push(itask.identity.clone());
                }
            }
            if matched.len() == before {
                warn!(%item, "no matching task instances");
                bad.push(item.clone());
            }
        }
        (matched, bad)
    }

    pub fn hold_tasks(&mut self, items: &[String]) -> Vec<String> {
        let (ids, bad) = self.filter_task_proxies(items);
        for id in ids {
            if let Some(itask) = self.get_task_mut(&id) {
                if itask.state.reset(None, Some(true)) {
                    info!(task = %id, "held");
                }
            }
        }
        bad
    }

    pub fn release_tasks(&mut self, items: &[String]) -> Vec<String> {
        let (ids, bad) = self.filter_task_proxies(items);
        for id in ids {
            if let Some(itask) = self.get_task_mut(&id) {
                if itask.state.reset(None, Some(false)) {
                    info!(task = %id, "released");
                }
            }
        }
        bad
    }

    /// Hold the workflow: every current instance, and any added later.
    pub fn hold_all_tasks(&mut self) {
        info!("holding all tasks");
        self.is_held = true;
        for itask in self.get_all_tasks_mut() {
            itask.state.reset(None, Some(true));
        }
    }

    /// Release the workflow and clear the hold point.
    pub fn release_all_tasks(&mut self) {
        info!("releasing all tasks");
        self.is_held = false;
        self.hold_point = None;
        for itask in self.get_all_tasks_mut() {
            itask.state.reset(None, Some(false));
        }
    }

    /// Hold every instance beyond `point`, now and as they are added.
    pub fn set_hold_point(&mut self, point: CyclePoint) {
        info!(hold_point = %point, "setting hold point");
        self.hold_point = Some(point);
        for itask in self.get_all_tasks_mut().filter(|t| t.point() > point) {
            itask.state.reset(None, Some(true));
        }
    }

    /// Move the stop point. Waiting and queued instances beyond it are held.
    /// Returns false if the stop point is unchanged.
    pub fn set_stop_point(&mut self, point: CyclePoint) -> bool {
        if self.stop_point == Some(point) {
            return false;
        }
        info!(stop_point = %point, "setting stop point");
        self.stop_point = Some(point);
        self.runahead_cache = None;
        for itask in self.get_all_tasks_mut().filter(|t| {
            t.point() > point
                && t
                    .state
                    .matches(&[TaskStatus::Waiting, TaskStatus::Queued], Some(false))
        }) {
            itask.state.reset(None, Some(true));
        }
        true
    }

    /// Run instances once regardless of prerequisites and queue limits.
    ///
    /// An exact selector naming an instance not yet in the pool spawns it.
    /// Active instances are left alone.
    pub fn trigger_tasks(&mut self, items: &[String], now: DateTime<Utc>) -> Vec<String> {
        let mut bad = Vec::new();
        let mut ids = Vec::new();
        for item in items {
            let (mut found, _) = self.filter_task_proxies(std::slice::from_ref(item));
            if found.is_empty() {
                let exact = TaskMatcher::parse(item).ok().and_then(|m| m.exact());
                if let Some(id) = exact {
                    if let Some(id) = self.spawn(None, &id.name, id.point, None, true, now) {
                        found.push(id);
                    }
                }
            }
            if found.is_empty() {
                bad.push(item.clone());
            }
            ids.extend(found);
        }

        for id in ids {
            let Some(itask) = self.get_task_mut(&id) else {
                continue;
            };
            if itask.state.is(&TaskStatus::ACTIVE) {
                warn!(task = %id, status = %itask.state.status, "not triggering an active task");
                continue;
            }
            itask.manual_trigger = true;
            itask.state.set_prerequisites_all_satisfied();
            itask.state.reset(None, Some(false));
            itask.state.is_updated = true;
            info!(task = %id, "triggered");
            self.finished_tasks.retain(|f| f != &id);
            if self.is_in_runahead(&id) {
                self.release_runahead_task(&id, now);
            }
        }
        bad
    }

    /// Spawn the children of matched instances as if `outputs` had been
    /// completed, without touching the instances themselves.
    pub fn force_spawn_children(
        &mut self,
        items: &[String],
        outputs: &[String],
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let (ids, bad) = self.filter_task_proxies(items);
        let outputs: Vec<&str> = if outputs.is_empty() {
            vec![OUTPUT_SUCCEEDED]
        } else {
            outputs.iter().map(|o| normalise_output_label(o)).collect()
        };
        for id in ids {
            for output in &outputs {
                info!(task = %id, %output, "forcing spawn of children");
                self.spawn_on_output(&id, output, now);
            }
        }
        bad
    }

    pub fn remove_tasks(&mut self, items: &[String]) -> Vec<String> {
        let (ids, bad) = self.filter_task_proxies(items);
        for id in ids {
            self.remove(&id, "request");
        }
        bad
    }

    /// Swap in a new configuration.
    ///
    /// Every instance is rebuilt against its new definition, keeping its
    /// runtime state. Instances whose task was removed from the workflow are
    /// dropped unless a job is in flight; those keep their old definition
    /// until they finish. Queues are rebuilt from the new configuration.
    pub fn reload(&mut self, new_config: WorkflowConfig) {
        let generation = self.config.generation + 1;
        let config = Arc::new(new_config.with_generation(generation));
        info!(generation, "reloading task definitions");

        self.orphans = self
            .config
            .task_names()
            .filter(|name| !config.taskdefs.contains_key(*name))
            .map(str::to_string)
            .collect();
        for name in &self.orphans {
            warn!(task = %name, "removed task definition: orphaned instances will not respawn");
        }

        let mut queues: BTreeMap<String, TaskQueue> = config
            .queues
            .iter()
            .map(|(name, q)| (name.clone(), TaskQueue::new(q.limit)))
            .collect();
        queues.entry(DEFAULT_QUEUE.to_string()).or_default();

        let main_pool = std::mem::take(&mut self.main_pool);
        let runahead_pool = std::mem::take(&mut self.runahead_pool);
        let mut main_order: Vec<TaskId> = Vec::new();
        for old_queue in self.queues.values() {
            main_order.extend(old_queue.members().iter().cloned());
        }

        for (pool, is_main) in [(runahead_pool, false), (main_pool, true)] {
            for old in pool.into_values().flat_map(|m| m.into_values()) {
                if !config.taskdefs.contains_key(old.name()) && !old.state.is(&TaskStatus::ACTIVE) {
                    info!(task = %old.identity, "removing orphaned task");
                    self.db.put_remove_task(&old);
                    continue;
                }
                let itask = Self::rebuild_for_reload(&config, old);
                if is_main {
                    Self::insert_into(&mut self.main_pool, itask);
                } else {
                    Self::insert_into(&mut self.runahead_pool, itask);
                }
            }
        }

        // Keep queue order stable across the reload.
        for id in main_order {
            let Some(itask) = Self::find_in(&self.main_pool, &id) else {
                continue;
            };
            let queue = if queues.contains_key(&itask.tdef.queue) {
                itask.tdef.queue.clone()
            } else {
                DEFAULT_QUEUE.to_string()
            };
            queues.entry(queue).or_default().push_back(id);
        }

        self.queues = queues;
        self.config = config;
        self.runahead_cache = None;
        self.set_max_future_offset();
    }

    fn rebuild_for_reload(config: &WorkflowConfig, old: TaskProxy) -> TaskProxy {
        let Some(tdef) = config.taskdefs.get(old.name()) else {
            warn!(task = %old.identity, "orphaned task still active: keeping until it finishes");
            return old;
        };
        let mut itask = TaskProxy::new(
            tdef.clone(),
            old.point(),
            config,
            old.state.status,
            old.state.is_held,
            old.flow_label.clone(),
        );
        itask.copy_state_from(&old);
        itask.state.is_updated = true;
        itask
    }
}
