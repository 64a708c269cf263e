// src/scheduler/core.rs

//! Pure core of the scheduler loop.
//!
//! [`SchedulerCore`] owns the task pool, the job manager and the trigger
//! oracle. It consumes one [`SchedulerEvent`] at a time and returns the
//! commands the async shell should run next. It has no channels, no Tokio
//! types and starts no processes, so every scheduling decision can be unit
//! tested with an explicit clock.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::cycling::CyclePoint;
use crate::errors::{Result, SchedulerError};
use crate::job::{MessageFlag, TaskJobManager};
use crate::pool::TaskPool;
use crate::task::{JobRef, TaskStatus};
use crate::triggers::{find_expired_tasks, update_trigger_states, TriggerOracle};
use crate::types::{Severity, StopMode};

use super::{CoreCommand, CoreStep, SchedulerEvent};

/// Startup options that are not part of the workflow config.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerOptions {
    /// Shut down with an error as soon as the workflow stalls.
    pub abort_if_stalled: bool,
    /// Start with every task held.
    pub hold_on_start: bool,
}

#[derive(Debug)]
pub struct SchedulerCore {
    pool: TaskPool,
    jobs: TaskJobManager,
    oracle: Box<dyn TriggerOracle>,
    options: SchedulerOptions,
    stop_mode: Option<StopMode>,
    kill_issued: bool,
    stalled: bool,
    /// Oldest cycle point in the pool when broadcasts were last expired.
    oldest_point: Option<CyclePoint>,
}

impl SchedulerCore {
    pub fn new(
        pool: TaskPool,
        jobs: TaskJobManager,
        oracle: Box<dyn TriggerOracle>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            pool,
            jobs,
            oracle,
            options,
            stop_mode: None,
            kill_issued: false,
            stalled: false,
            oldest_point: None,
        }
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut TaskPool {
        &mut self.pool
    }

    pub fn jobs(&self) -> &TaskJobManager {
        &self.jobs
    }

    pub(super) fn parts_mut(
        &mut self,
    ) -> (&mut TaskPool, &mut TaskJobManager, &mut dyn TriggerOracle) {
        (&mut self.pool, &mut self.jobs, self.oracle.as_mut())
    }

    pub fn stop_mode(&self) -> Option<StopMode> {
        self.stop_mode
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Populate the pool: from the state store on restart, otherwise from
    /// the initial cycle point.
    pub fn start(&mut self, restart: bool, now: DateTime<Utc>) -> Result<()> {
        if restart {
            let loaded = self.pool.load_for_restart(now)?;
            info!(tasks = loaded, "restarting from the state store");
        } else {
            self.pool.load_from_point(now);
            info!(
                initial_point = %self.pool.config().initial_point,
                "starting from the initial cycle point"
            );
        }
        if self.options.hold_on_start {
            self.pool.hold_all_tasks();
        }
        self.pool.persist_changes(now);
        self.pool.db_mut().process_queued_ops(now)
    }

    /// Request a stop. A later request replaces an earlier one.
    pub fn set_stop_mode(&mut self, mode: StopMode) {
        if self.stop_mode != Some(mode) {
            info!(mode = mode.describe(), "stop requested");
            self.stop_mode = Some(mode);
        }
    }

    /// Handle one event at the current wall-clock time.
    pub fn step(&mut self, event: SchedulerEvent) -> Result<CoreStep> {
        self.step_at(event, Utc::now())
    }

    /// Handle one event at `now`.
    pub fn step_at(&mut self, event: SchedulerEvent, now: DateTime<Utc>) -> Result<CoreStep> {
        match event {
            SchedulerEvent::CommandCompleted(result) => {
                self.jobs.handle_command_result(&mut self.pool, result, now);
                Ok(self.flush(true))
            }
            SchedulerEvent::JobMessage {
                job,
                severity,
                message,
                event_time,
            } => {
                self.process_job_message(&job, severity, &message, event_time, now);
                Ok(self.flush(true))
            }
            SchedulerEvent::Operator(command) => {
                self.handle_operator_command(command, now)?;
                Ok(self.flush(true))
            }
            SchedulerEvent::Tick => self.iterate(now),
            SchedulerEvent::ShutdownRequested => {
                self.set_stop_mode(StopMode::RequestNow);
                self.iterate(now)
            }
        }
    }

    fn process_job_message(
        &mut self,
        job: &JobRef,
        severity: Severity,
        message: &str,
        event_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let Some(id) = TaskJobManager::task_for_job(&self.pool, job) else {
            return;
        };
        self.jobs.process_message(
            &mut self.pool,
            &id,
            severity,
            message,
            event_time,
            MessageFlag::Received,
            now,
        );
    }

    /// One pass of the main loop.
    fn iterate(&mut self, now: DateTime<Utc>) -> Result<CoreStep> {
        if self.pool.release_runahead_tasks(now) {
            debug!("released runahead tasks");
        }
        update_trigger_states(&mut self.pool, self.oracle.as_mut(), now);
        let expired = find_expired_tasks(&self.pool, self.oracle.as_ref(), now);
        if !expired.is_empty() {
            self.pool.set_expired_tasks(&expired, now);
        }

        if self.stop_mode.is_none() {
            let ready = self.pool.get_ready_tasks(now);
            if !ready.is_empty() {
                self.jobs.submit_task_jobs(&mut self.pool, &ready, now);
            }
        }

        self.pool.remove_suiciding_tasks();
        self.jobs.sim_time_check(&mut self.pool, now);
        self.jobs.check_task_jobs(&mut self.pool, now);
        self.pool.remove_finished_tasks();
        self.expire_broadcasts();

        self.pool.persist_changes(now);
        self.pool.db_mut().process_queued_ops(now)?;

        self.check_stalled()?;
        let stopping = self.check_stop(now)?;
        Ok(self.flush(!stopping))
    }

    fn expire_broadcasts(&mut self) {
        let oldest = self.pool.get_all_tasks().map(|t| t.point()).min();
        if oldest.is_none() || oldest == self.oldest_point {
            return;
        }
        self.oldest_point = oldest;
        if let Some(point) = oldest {
            let n = self.jobs.broadcasts_mut().expire_broadcast(point);
            if n > 0 {
                info!(expired = n, before = %point, "expired broadcasts");
            }
        }
    }

    fn check_stalled(&mut self) -> Result<()> {
        let stalled = self.stop_mode.is_none() && self.pool.is_stalled();
        if stalled && !self.stalled {
            warn!("workflow stalled");
            let unmet = self.pool.report_stalled_task_deps();
            if self.options.abort_if_stalled {
                error!("abort on stall is set; shutting down");
                return Err(SchedulerError::Stalled(unmet.join("; ")));
            }
        }
        self.stalled = stalled;
        Ok(())
    }

    /// Returns true once the workflow may shut down.
    fn check_stop(&mut self, now: DateTime<Utc>) -> Result<bool> {
        if self.stop_mode.is_none() && self.pool.is_complete() {
            self.set_stop_mode(StopMode::Auto);
        }
        let Some(mode) = self.stop_mode else {
            return Ok(false);
        };
        if mode == StopMode::RequestKill && !self.kill_issued {
            let active = self.pool.task_ids_with(&TaskStatus::ACTIVE);
            self.jobs.kill_task_jobs(&mut self.pool, &active, now);
            self.kill_issued = true;
        }
        if !self.pool.can_stop(mode) {
            return Ok(false);
        }
        if mode != StopMode::RequestNowNow {
            self.pool.warn_stop_orphans();
            self.pool.persist_changes(now);
            self.pool.db_mut().process_queued_ops(now)?;
        }
        info!(reason = mode.describe(), "workflow shutting down");
        Ok(true)
    }

    /// Collect queued job commands into a step.
    fn flush(&mut self, keep_running: bool) -> CoreStep {
        let mut commands = Vec::new();
        if self.jobs.has_pending_commands() {
            commands.push(CoreCommand::RunCommands(self.jobs.take_commands()));
        }
        if !keep_running {
            commands.push(CoreCommand::CloseRunner);
        }
        CoreStep {
            commands,
            keep_running,
        }
    }
}
