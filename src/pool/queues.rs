// src/pool/queues.rs

//! Named queues and ready-task selection.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::task::{TaskId, TaskStatus};

use super::TaskPool;

/// An insertion-ordered set of main pool instances sharing an active limit.
/// A limit of 0 means unlimited.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    pub limit: usize,
    members: Vec<TaskId>,
}

impl TaskQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            members: Vec::new(),
        }
    }

    pub fn push_back(&mut self, id: TaskId) {
        self.remove(&id);
        self.members.push(id);
    }

    pub fn remove(&mut self, id: &TaskId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != id);
        before != self.members.len()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.members.contains(id)
    }

    pub fn members(&self) -> &[TaskId] {
        &self.members
    }
}

impl TaskPool {
    /// Queue instances that have become ready, then release queued
    /// instances each queue's limit allows.
    ///
    /// Phase 1 walks each queue in order and moves every unqueued member
    /// whose readiness test passes to QUEUED and to the back of the queue,
    /// clearing its manual trigger flag. Phase 2 counts each queue's active,
    /// unheld members and releases QUEUED, unheld members in queue order
    /// while the limit allows; a member triggered while already QUEUED is
    /// always released and its flag is consumed.
    ///
    /// Calling this again without intervening state changes returns the
    /// same instances: they are still QUEUED and still within budget.
    pub fn get_ready_tasks(&mut self, now: DateTime<Utc>) -> Vec<TaskId> {
        let Self {
            main_pool, queues, ..
        } = self;

        // Phase 1: each queue in its own order. A manual trigger is spent
        // here, so an unqueued instance needs a second one to jump a full
        // queue.
        for queue in queues.values_mut() {
            let newly_queued: Vec<TaskId> = queue
                .members
                .iter()
                .filter(|id| {
                    main_pool
                        .get(&id.point)
                        .and_then(|m| m.get(*id))
                        .is_some_and(|t| t.state.status != TaskStatus::Queued && t.is_ready(now))
                })
                .cloned()
                .collect();
            for id in newly_queued {
                if let Some(itask) = main_pool.get_mut(&id.point).and_then(|m| m.get_mut(&id)) {
                    itask.state.reset(Some(TaskStatus::Queued), None);
                    itask.manual_trigger = false;
                    debug!(task = %id, "queued");
                }
                queue.push_back(id);
            }
        }

        // Phase 2
        let mut ready = Vec::new();
        for (name, queue) in queues.iter() {
            let lookup = |id: &TaskId| main_pool.get(&id.point).and_then(|m| m.get(id));
            let n_active = queue
                .members
                .iter()
                .filter_map(lookup)
                .filter(|t| t.state.matches(&TaskStatus::ACTIVE, Some(false)))
                .count();
            let mut budget = queue.limit as i64 - n_active as i64;
            for id in &queue.members {
                let Some(itask) = lookup(id) else { continue };
                if !itask.state.matches(&[TaskStatus::Queued], Some(false)) {
                    continue;
                }
                if itask.manual_trigger || queue.limit == 0 || budget > 0 {
                    budget -= 1;
                    ready.push(id.clone());
                }
            }
            debug!(queue = %name, n_active, limit = queue.limit, "queue scanned");
        }

        for id in &ready {
            if let Some(itask) = main_pool.get_mut(&id.point).and_then(|m| m.get_mut(id)) {
                itask.manual_trigger = false;
            }
        }
        ready
    }
}
