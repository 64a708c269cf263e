// src/pool/removal.rs

//! Taking instances out of the pool, and deciding whether the workflow is
//! stuck or done.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::task::{TaskId, TaskStatus};
use crate::types::StopMode;

use super::TaskPool;

impl TaskPool {
    /// Remove finished instances whose parents have all finished too.
    ///
    /// Does nothing while the pool is stalled: finished instances are kept
    /// so the operator can see what happened. Candidates whose parents are
    /// still around are re-queued for a later pass.
    pub fn remove_finished_tasks(&mut self) -> bool {
        if self.finished_tasks.is_empty() {
            return false;
        }
        if !self
            .get_all_tasks()
            .any(|t| t.state.is(&TaskStatus::NOT_STALLED))
        {
            return false;
        }

        let candidates = std::mem::take(&mut self.finished_tasks);
        for id in &candidates {
            let children: Vec<TaskId> = match self.get_task(id) {
                Some(itask) => itask.children.values().flatten().cloned().collect(),
                None => continue,
            };
            for child in children {
                if let Some(flag) = self
                    .get_task_mut(&child)
                    .and_then(|c| c.parents.get_mut(id))
                {
                    *flag = true;
                }
            }
        }

        let mut removed = false;
        for id in candidates {
            let parents_done = match self.get_task(&id) {
                Some(itask) => itask.parents.values().all(|done| *done),
                None => continue,
            };
            if parents_done {
                removed |= self.remove(&id, "finished").is_some();
            } else {
                self.finished_tasks.push(id);
            }
        }
        removed
    }

    /// Remove instances whose suicide prerequisites are all satisfied.
    pub fn remove_suiciding_tasks(&mut self) -> Vec<TaskId> {
        let doomed: Vec<TaskId> = self
            .get_all_tasks()
            .filter(|t| t.state.suicide_prerequisites_all_satisfied())
            .map(|t| t.identity.clone())
            .collect();
        for id in &doomed {
            if let Some(itask) = self.get_task(id) {
                if itask.state.is(&TaskStatus::ACTIVE) {
                    warn!(task = %id, status = %itask.state.status, "suiciding while active");
                }
            }
            self.remove(id, "suicide");
        }
        doomed
    }

    /// Stalled: no instance can make progress without intervention.
    ///
    /// Instances beyond the stop point, or succeeded or expired, are ignored.
    /// Anything in a progressing status, or a waiting instance with all
    /// prerequisites satisfied, means not stalled. A held workflow is never
    /// reported stalled.
    pub fn is_stalled(&self) -> bool {
        if self.is_held {
            return false;
        }
        let mut can_be_stalled = false;
        for itask in self.get_all_tasks() {
            if self.stop_point.map(|s| itask.point() > s).unwrap_or(false)
                || itask.state.is(&[TaskStatus::Succeeded, TaskStatus::Expired])
            {
                continue;
            }
            can_be_stalled = true;
            if itask.state.is(&TaskStatus::NOT_STALLED) {
                return false;
            }
            if itask.state.status == TaskStatus::Waiting
                && itask.state.prerequisites_all_satisfied()
            {
                return false;
            }
        }
        can_be_stalled
    }

    /// Log and return the unmet dependencies of waiting instances.
    ///
    /// Instances whose unmet upstreams are all themselves waiting in the
    /// pool are left out: the root cause lies further upstream.
    pub fn report_stalled_task_deps(&self) -> Vec<String> {
        let is_waiting = |id: &TaskId| {
            self.get_task(id)
                .map(|t| t.state.status == TaskStatus::Waiting)
                .unwrap_or(false)
        };
        let mut report = Vec::new();
        for itask in self.get_all_tasks() {
            if itask.state.is(&TaskStatus::FAILURE) {
                report.push(format!("{} => {}", itask.identity, itask.state.status));
                continue;
            }
            if itask.state.status != TaskStatus::Waiting {
                continue;
            }
            let unmet: Vec<_> = itask
                .state
                .prerequisites
                .iter()
                .filter(|p| !p.is_satisfied())
                .collect();
            if unmet.is_empty() || unmet.iter().flat_map(|p| p.upstream_tasks()).all(is_waiting) {
                continue;
            }
            let conditions: Vec<String> = unmet
                .iter()
                .flat_map(|p| p.dump())
                .filter(|(_, satisfied)| !satisfied)
                .map(|(condition, _)| condition)
                .collect();
            report.push(format!("{} => {}", itask.identity, conditions.join(", ")));
        }
        for line in &report {
            warn!("unmet: {line}");
        }
        report
    }

    /// Every instance has succeeded or expired, or lies beyond the stop point.
    pub fn is_complete(&self) -> bool {
        self.get_all_tasks().all(|t| {
            t.state.is(&[TaskStatus::Succeeded, TaskStatus::Expired])
                || (self.stop_point.map(|s| t.point() > s).unwrap_or(false)
                    && !t.state.is(&TaskStatus::ACTIVE))
        })
    }

    /// Whether the scheduler may shut down under `stop_mode`.
    pub fn can_stop(&self, stop_mode: StopMode) -> bool {
        match stop_mode {
            StopMode::RequestNow | StopMode::RequestNowNow => true,
            StopMode::Auto => self.is_complete(),
            StopMode::RequestClean | StopMode::RequestKill => !self
                .get_tasks()
                .any(|t| t.state.is(&TaskStatus::ACTIVE) && !t.state.kill_failed),
        }
    }

    /// Warn about active jobs that will be left behind by shutdown.
    pub fn warn_stop_orphans(&self) -> usize {
        let mut n = 0;
        for itask in self.get_tasks() {
            if itask.state.is(&TaskStatus::ACTIVE) {
                n += 1;
                if itask.state.kill_failed {
                    warn!(task = %itask.identity, "orphaned task (kill failed)");
                } else {
                    warn!(task = %itask.identity, status = %itask.state.status, "orphaned task");
                }
            }
        }
        if n > 0 {
            info!(orphans = n, "active jobs left running at shutdown");
        }
        n
    }

    /// Expire waiting instances whose expiry time has passed.
    pub fn set_expired_tasks(&mut self, expired: &[TaskId], now: DateTime<Utc>) -> usize {
        expired
            .iter()
            .filter(|id| self.set_expired_task(id, now))
            .count()
    }
}
