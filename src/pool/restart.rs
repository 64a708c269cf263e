// src/pool/restart.rs

//! Rebuilding the pool from the state store on restart.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::errors::Result;
use crate::persistence::manager::POLL_TIMER_KEY;
use crate::persistence::{TaskPoolRow, TaskTimerRow};
use crate::task::{RetryPhase, TaskActionTimer, TaskId, TaskProxy, TaskStatus};

use super::TaskPool;

impl TaskPool {
    /// Load one persisted instance.
    ///
    /// Instances that had been queued or readied go back to waiting with
    /// their prerequisites satisfied so they queue again. Everything past
    /// the waiting stage has its prerequisites satisfied. Finished instances
    /// are queued for removal.
    pub fn load_db_task_pool_for_restart(&mut self, row: TaskPoolRow, now: DateTime<Utc>) {
        let config = self.config.clone();
        let Some(tdef) = config.taskdefs.get(&row.name) else {
            warn!(task = %row.name, point = %row.cycle, "ignoring task with no definition");
            return;
        };
        let mut itask = TaskProxy::new(
            tdef.clone(),
            row.cycle,
            &config,
            row.status,
            row.is_held,
            row.flow_label.clone(),
        );
        itask.submit_num = row.submit_num;
        itask.summary.job_id = row.job_id.clone();
        itask.summary.job_runner_name = row.job_runner_name.clone();
        itask.summary.submitted_time = row.time_submit;
        itask.summary.started_time = row.time_run;
        if let Some(name) = &row.platform_name {
            itask.platform = config.platforms.get(name).cloned();
            itask.summary.platforms_used.insert(row.submit_num, name.clone());
        }
        if row.submit_num > 0 {
            itask.jobs.push(itask.job_ref().to_string());
        }

        let submission = tdef
            .rtconfig
            .submission_retry_delays
            .clone()
            .or_else(|| itask.platform.as_ref().map(|p| p.submission_retry_delays.clone()))
            .unwrap_or_default();
        itask.set_retry_delays(tdef.rtconfig.execution_retry_delays.clone(), submission);

        match row.status {
            TaskStatus::Waiting => {}
            TaskStatus::Queued | TaskStatus::Ready => {
                itask.state.status = TaskStatus::Waiting;
                itask.state.set_prerequisites_all_satisfied();
            }
            _ => itask.state.set_prerequisites_all_satisfied(),
        }
        for message in &row.outputs {
            itask.state.outputs.set_msg_completed(message);
        }

        let id = itask.identity.clone();
        info!(task = %id, status = %itask.state.status, held = itask.state.is_held, "loaded from state store");
        if self.add_to_runahead_pool(itask, false, now).is_some() && row.status.is_finished() {
            self.queue_finished(&id);
        }
    }

    /// Restore retry and poll timers.
    pub fn load_db_task_action_timers(&mut self, row: TaskTimerRow) {
        let id = TaskId::new(row.name.clone(), row.cycle);
        let Some(itask) = self.get_task_mut(&id) else {
            warn!(task = %id, key = %row.ctx_key, "ignoring timer for unknown task");
            return;
        };
        let timer = if row.ctx_key == POLL_TIMER_KEY {
            itask.poll_timer.get_or_insert_with(TaskActionTimer::default)
        } else if let Some(phase) = RetryPhase::parse(&row.ctx_key) {
            itask.try_timers.entry(phase).or_default()
        } else {
            warn!(task = %id, key = %row.ctx_key, "ignoring unknown timer");
            return;
        };
        timer.num = row.num;
        timer.delay = row.delay_secs.map(Duration::from_secs_f64);
        timer.timeout = row.timeout;
    }

    /// Restore the whole pool from the state store.
    pub fn load_for_restart(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let rows = self.db.select_task_pool_for_restart()?;
        let timers = self.db.select_task_timers()?;
        let n = rows.len();
        for row in rows {
            self.load_db_task_pool_for_restart(row, now);
        }
        for row in timers {
            self.load_db_task_action_timers(row);
        }
        info!(tasks = n, "task pool restored");
        Ok(n)
    }
}
