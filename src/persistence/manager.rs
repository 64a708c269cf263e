// src/persistence/manager.rs

//! Queues row operations and flushes them to the primary and (optional)
//! public stores.
//!
//! A primary store failure is fatal. A public store failure is retried with
//! exponential backoff; after `max_public_retries` consecutive failures the
//! public store is rebuilt from a snapshot of the primary.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, warn};

use crate::errors::{Result, SchedulerError};
use crate::task::TaskProxy;

use super::{
    DbOp, MemoryStore, StateStore, TaskJobRow, TaskJobUpdate, TaskOutputsRow, TaskPoolRow,
    TaskStateRow, TaskTimerRow,
};

pub const POLL_TIMER_KEY: &str = "poll";

#[derive(Debug)]
pub struct WorkflowDbManager {
    primary: Box<dyn StateStore>,
    public: Option<Box<dyn StateStore>>,
    queued: Vec<DbOp>,
    /// Ops the public store has not accepted yet.
    public_backlog: Vec<DbOp>,
    public_failures: u32,
    public_next_attempt: Option<DateTime<Utc>>,
    max_public_retries: u32,
    public_retry_delay: Duration,
}

impl WorkflowDbManager {
    pub fn new(
        primary: Box<dyn StateStore>,
        public: Option<Box<dyn StateStore>>,
        max_public_retries: u32,
        public_retry_delay: Duration,
    ) -> Self {
        Self {
            primary,
            public,
            queued: Vec::new(),
            public_backlog: Vec::new(),
            public_failures: 0,
            public_next_attempt: None,
            max_public_retries,
            public_retry_delay,
        }
    }

    /// Primary-only manager over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()), None, 0, Duration::ZERO)
    }

    pub fn put(&mut self, op: DbOp) {
        self.queued.push(op);
    }

    /// Number of operations waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.queued.len()
    }

    fn state_row(itask: &TaskProxy, now: DateTime<Utc>) -> TaskStateRow {
        TaskStateRow {
            cycle: itask.point(),
            name: itask.name().to_string(),
            submit_num: itask.submit_num,
            status: itask.state.status,
            is_held: itask.state.is_held,
            flow_label: itask.flow_label.clone(),
            time_updated: now,
        }
    }

    pub fn put_insert_task_state(&mut self, itask: &TaskProxy, now: DateTime<Utc>) {
        self.put(DbOp::InsertTaskState(Self::state_row(itask, now)));
    }

    pub fn put_update_task_state(&mut self, itask: &TaskProxy, now: DateTime<Utc>) {
        self.put(DbOp::UpdateTaskState(Self::state_row(itask, now)));
    }

    pub fn put_remove_task(&mut self, itask: &TaskProxy) {
        self.put(DbOp::RemoveFromPool {
            cycle: itask.point(),
            name: itask.name().to_string(),
        });
    }

    pub fn put_insert_task_job(&mut self, itask: &TaskProxy, now: DateTime<Utc>) {
        let platform = itask.platform.as_ref();
        self.put(DbOp::InsertTaskJob(TaskJobRow {
            cycle: itask.point(),
            name: itask.name().to_string(),
            submit_num: itask.submit_num,
            try_num: itask.try_num(),
            run_mode: itask
                .run_mode
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            platform_name: platform.map(|p| p.name.clone()).unwrap_or_default(),
            job_runner_name: platform.map(|p| p.job_runner.clone()).unwrap_or_default(),
            job_id: None,
            submit_status: None,
            run_status: None,
            run_signal: None,
            time_submit: Some(now),
            time_submit_exit: None,
            time_run: None,
            time_run_exit: None,
        }));
    }

    pub fn put_update_task_job(&mut self, update: TaskJobUpdate) {
        self.put(DbOp::UpdateTaskJob(update));
    }

    pub fn put_update_task_outputs(&mut self, itask: &TaskProxy) {
        self.put(DbOp::UpdateTaskOutputs(TaskOutputsRow {
            cycle: itask.point(),
            name: itask.name().to_string(),
            outputs: itask.state.outputs.completed_messages(),
        }));
    }

    /// Record every retry timer and the poll timer of `itask`.
    pub fn put_task_timers(&mut self, itask: &TaskProxy) {
        let rows: Vec<TaskTimerRow> = itask
            .try_timers
            .iter()
            .map(|(phase, t)| (phase.as_str(), t))
            .chain(itask.poll_timer.as_ref().map(|t| (POLL_TIMER_KEY, t)))
            .map(|(key, t)| TaskTimerRow {
                cycle: itask.point(),
                name: itask.name().to_string(),
                ctx_key: key.to_string(),
                num: t.num,
                delay_secs: t.delay.map(|d| d.as_secs_f64()),
                timeout: t.timeout,
            })
            .collect();
        for row in rows {
            self.put(DbOp::PutTaskTimer(row));
        }
    }

    /// Flush queued operations.
    pub fn process_queued_ops(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.queued.is_empty() {
            let ops = std::mem::take(&mut self.queued);
            debug!(count = ops.len(), "writing queued state operations");
            self.primary.apply(&ops).map_err(|e| {
                SchedulerError::Persistence(format!("primary state store write failed: {e:#}"))
            })?;
            if self.public.is_some() {
                self.public_backlog.extend(ops);
            }
        }
        self.flush_public(now);
        Ok(())
    }

    fn flush_public(&mut self, now: DateTime<Utc>) {
        let Some(public) = self.public.as_mut() else {
            return;
        };
        if self.public_backlog.is_empty() {
            return;
        }
        if let Some(next) = self.public_next_attempt {
            if now < next {
                return;
            }
        }

        match public.apply(&self.public_backlog) {
            Ok(()) => {
                self.public_backlog.clear();
                self.public_failures = 0;
                self.public_next_attempt = None;
            }
            Err(e) => {
                self.public_failures += 1;
                if self.public_failures > self.max_public_retries {
                    error!(
                        failures = self.public_failures,
                        error = %e,
                        "public state store keeps failing; rebuilding it from the primary"
                    );
                    let restored = self
                        .primary
                        .snapshot()
                        .and_then(|snapshot| public.restore(snapshot));
                    if let Err(e) = restored {
                        error!(error = %e, "could not rebuild public state store");
                    }
                    self.public_backlog.clear();
                    self.public_failures = 0;
                    self.public_next_attempt = None;
                } else {
                    let factor = 2u32.saturating_pow(self.public_failures - 1);
                    let backoff = self.public_retry_delay.saturating_mul(factor);
                    warn!(
                        failures = self.public_failures,
                        retry_in = ?backoff,
                        error = %e,
                        "public state store write failed; will retry"
                    );
                    self.public_next_attempt =
                        Some(now + TimeDelta::from_std(backoff).unwrap_or(TimeDelta::MAX));
                }
            }
        }
    }

    pub fn select_task_pool_for_restart(&self) -> Result<Vec<TaskPoolRow>> {
        let snapshot = self
            .primary
            .snapshot()
            .map_err(|e| SchedulerError::Persistence(format!("reading task pool: {e:#}")))?;
        Ok(snapshot.task_pool_rows())
    }

    pub fn select_task_timers(&self) -> Result<Vec<TaskTimerRow>> {
        let snapshot = self
            .primary
            .snapshot()
            .map_err(|e| SchedulerError::Persistence(format!("reading task timers: {e:#}")))?;
        Ok(snapshot.task_timers)
    }
}
