// src/job/events.rs

//! Job messages: the only path by which job activity changes task state.
//!
//! Messages arrive from the job itself (received), from poll results
//! (polled), from submit and kill results, and from the in-process run
//! modes. Standard messages move the task along its status ladder; other
//! messages complete custom outputs or are just logged.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::persistence::TaskJobUpdate;
use crate::pool::TaskPool;
use crate::task::outputs::{
    OUTPUT_FAILED, OUTPUT_STARTED, OUTPUT_SUBMITTED, OUTPUT_SUBMIT_FAILED, OUTPUT_SUCCEEDED,
};
use crate::task::{RetryPhase, TaskActionTimer, TaskId, TaskProxy, TaskStatus};
use crate::types::Severity;

use super::poll::FAIL_MESSAGE_PREFIX;
use super::TaskJobManager;

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFlag {
    Received,
    Polled,
}

/// Position on the job life cycle, for ignoring stale or repeated messages.
fn job_progress(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Waiting | TaskStatus::Expired | TaskStatus::Queued | TaskStatus::Ready => 0,
        TaskStatus::Submitted => 1,
        TaskStatus::SubmitFailed | TaskStatus::SubmitRetrying => 2,
        TaskStatus::Running => 3,
        TaskStatus::Retrying | TaskStatus::Failed | TaskStatus::Succeeded => 4,
    }
}

/// The status a standard message moves a task to.
fn implied_status(message: &str) -> Option<TaskStatus> {
    match message {
        OUTPUT_SUBMITTED => Some(TaskStatus::Submitted),
        OUTPUT_SUBMIT_FAILED => Some(TaskStatus::SubmitFailed),
        OUTPUT_STARTED => Some(TaskStatus::Running),
        OUTPUT_SUCCEEDED => Some(TaskStatus::Succeeded),
        m if m == OUTPUT_FAILED || m.starts_with(FAIL_MESSAGE_PREFIX) => Some(TaskStatus::Failed),
        _ => None,
    }
}

/// Execution poll delays for a job with an optional time limit.
///
/// Without a limit this is `base`. With one, `base` is cut short where the
/// running total would reach the limit, the next delay lands just after the
/// limit (plus the first time-limit interval), and the remaining time-limit
/// intervals follow.
pub fn execution_poll_delays(
    base: &[Duration],
    time_limit: Option<Duration>,
    limit_intervals: &[Duration],
) -> Vec<Duration> {
    let Some(limit) = time_limit else {
        return base.to_vec();
    };
    let mut delays = Vec::new();
    let mut total = Duration::ZERO;
    for d in base {
        if total + *d >= limit {
            break;
        }
        total += *d;
        delays.push(*d);
    }
    let first = limit_intervals.first().copied().unwrap_or(Duration::ZERO);
    delays.push((limit - total) + first);
    delays.extend(limit_intervals.iter().skip(1).copied());
    delays
}

#[derive(Debug, Clone, Copy)]
enum PollPhase {
    Submission,
    Execution,
}

fn set_poll_timer(itask: &mut TaskProxy, phase: PollPhase, now: DateTime<Utc>) {
    if itask.run_mode.map(|m| m.is_ghost()).unwrap_or(false) {
        itask.poll_timer = None;
        return;
    }
    let Some(platform) = itask.platform.as_ref() else {
        return;
    };
    let rt = &itask.tdef.rtconfig;
    let delays = match phase {
        PollPhase::Submission => rt
            .submission_polling_intervals
            .clone()
            .unwrap_or_else(|| platform.submission_polling_intervals.clone()),
        PollPhase::Execution => execution_poll_delays(
            rt.execution_polling_intervals
                .as_deref()
                .unwrap_or(&platform.execution_polling_intervals),
            itask.summary.execution_time_limit,
            &platform.execution_time_limit_polling_intervals,
        ),
    };
    let mut timer = TaskActionTimer::new(delays);
    timer.next(now, true);
    itask.poll_timer = Some(timer);
}

fn job_update(itask: &TaskProxy) -> TaskJobUpdate {
    TaskJobUpdate::new(itask.point(), itask.name(), itask.submit_num)
}

fn retry_message(timer: &TaskActionTimer) -> String {
    let secs = timer.delay.map(|d| d.as_secs()).unwrap_or(0);
    format!("retrying in PT{secs}S")
}

impl TaskJobManager {
    /// Apply a job message to a task instance. Returns whether it was acted on.
    ///
    /// Standard messages are ignored if they would not move the task
    /// forward on its job life cycle. Polled messages are also ignored
    /// while the task waits to retry: the poll saw the previous attempt.
    #[allow(clippy::too_many_arguments)]
    pub fn process_message(
        &mut self,
        pool: &mut TaskPool,
        id: &TaskId,
        severity: Severity,
        message: &str,
        event_time: Option<DateTime<Utc>>,
        flag: MessageFlag,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(itask) = pool.get_task_mut(id) else {
            warn!(task = %id, %message, "message for a task not in the pool");
            return false;
        };
        let status = itask.state.status;
        if let Some(implied) = implied_status(message) {
            if flag == MessageFlag::Polled
                && itask.state.is(&[TaskStatus::Retrying, TaskStatus::SubmitRetrying])
            {
                debug!(task = %id, %message, %status, "ignoring polled message while retrying");
                return false;
            }
            if job_progress(implied) <= job_progress(status) {
                debug!(task = %id, %message, %status, ?flag, "ignoring message: no progress");
                return false;
            }
        }

        let event_time = event_time.unwrap_or(now);
        itask.set_summary_message(message);
        match severity {
            Severity::Critical => warn!(task = %id, %message, ?flag, "job message (critical)"),
            Severity::Warning => warn!(task = %id, %message, ?flag, "job message (warning)"),
            Severity::Info => info!(task = %id, %message, ?flag, "job message"),
            Severity::Debug => debug!(task = %id, %message, ?flag, "job message"),
        }

        match message {
            OUTPUT_SUBMITTED => self.process_submitted(pool, id, event_time, now),
            OUTPUT_STARTED => self.process_started(pool, id, event_time, now),
            OUTPUT_SUCCEEDED => self.process_succeeded(pool, id, event_time, now),
            OUTPUT_SUBMIT_FAILED => self.process_submit_failed(pool, id, event_time, now),
            OUTPUT_FAILED => self.process_failed(pool, id, None, event_time, now),
            m if m.starts_with(FAIL_MESSAGE_PREFIX) => {
                let signal = m[FAIL_MESSAGE_PREFIX.len()..].to_string();
                self.process_failed(pool, id, Some(signal), event_time, now)
            }
            _ => self.process_custom(pool, id, message, now),
        }
        true
    }

    /// Spawn children of standard outputs that a jump in status completed
    /// without their own message (e.g. succeeded straight after submitted).
    fn spawn_skipped_outputs(
        pool: &mut TaskPool,
        id: &TaskId,
        before: &[(&'static str, bool)],
        now: DateTime<Utc>,
    ) {
        for (label, was_done) in before {
            if *was_done {
                continue;
            }
            let done_now = pool
                .get_task(id)
                .map(|t| t.state.outputs.is_completed(label))
                .unwrap_or(false);
            if done_now {
                pool.spawn_on_output(id, label, now);
            }
        }
    }

    fn standard_outputs_done(itask: &TaskProxy) -> Vec<(&'static str, bool)> {
        [OUTPUT_SUBMITTED, OUTPUT_STARTED]
            .into_iter()
            .map(|label| (label, itask.state.outputs.is_completed(label)))
            .collect()
    }

    fn process_submitted(
        &mut self,
        pool: &mut TaskPool,
        id: &TaskId,
        event_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let Some(itask) = pool.get_task_mut(id) else {
            return;
        };
        itask.summary.submitted_time = Some(event_time);
        if let Some(timer) = itask.try_timers.get_mut(&RetryPhase::Submission) {
            timer.num = 0;
        }
        itask.state.reset(Some(TaskStatus::Submitted), None);
        set_poll_timer(itask, PollPhase::Submission, now);
        let mut update = job_update(itask);
        update.submit_status = Some(0);
        update.time_submit_exit = Some(event_time);
        update.job_id = itask.summary.job_id.clone();
        pool.db_mut().put_update_task_job(update);
        pool.spawn_on_output(id, OUTPUT_SUBMITTED, now);
    }

    fn process_started(
        &mut self,
        pool: &mut TaskPool,
        id: &TaskId,
        event_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let Some(itask) = pool.get_task_mut(id) else {
            return;
        };
        let before = Self::standard_outputs_done(itask);
        itask.summary.started_time = Some(event_time);
        itask.state.reset(Some(TaskStatus::Running), None);
        set_poll_timer(itask, PollPhase::Execution, now);
        let mut update = job_update(itask);
        update.time_run = Some(event_time);
        pool.db_mut().put_update_task_job(update);
        Self::spawn_skipped_outputs(pool, id, &before[..1], now);
        pool.spawn_on_output(id, OUTPUT_STARTED, now);
    }

    fn process_succeeded(
        &mut self,
        pool: &mut TaskPool,
        id: &TaskId,
        event_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let Some(itask) = pool.get_task_mut(id) else {
            return;
        };
        let before = Self::standard_outputs_done(itask);
        itask.summary.finished_time = Some(event_time);
        itask.state.reset(Some(TaskStatus::Succeeded), None);
        itask.poll_timer = None;
        let mut update = job_update(itask);
        update.run_status = Some(0);
        update.time_run_exit = Some(event_time);
        pool.db_mut().put_update_task_job(update);
        Self::spawn_skipped_outputs(pool, id, &before, now);
        pool.spawn_on_output(id, OUTPUT_SUCCEEDED, now);
        pool.queue_finished(id);
        self.simulated.remove(id);
    }

    fn process_failed(
        &mut self,
        pool: &mut TaskPool,
        id: &TaskId,
        signal: Option<String>,
        event_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let Some(itask) = pool.get_task_mut(id) else {
            return;
        };
        itask.summary.finished_time = Some(event_time);
        itask.poll_timer = None;
        let mut update = job_update(itask);
        update.run_status = Some(1);
        update.time_run_exit = Some(event_time);
        if let Some(signal) = signal {
            itask.summary.run_signal = Some(signal.clone());
            update.run_signal = Some(signal);
        }

        let timer = itask.try_timers.entry(RetryPhase::Execution).or_default();
        let retrying = timer.next(now, false).is_some();
        if retrying {
            let message = retry_message(timer);
            info!(task = %id, try_num = timer.num + 1, "{message}");
            itask.state.reset(Some(TaskStatus::Retrying), None);
            itask.set_summary_message(&message);
            pool.db_mut().put_update_task_job(update);
        } else {
            itask.state.reset(Some(TaskStatus::Failed), None);
            pool.db_mut().put_update_task_job(update);
            pool.spawn_on_output(id, OUTPUT_FAILED, now);
            pool.queue_finished(id);
        }
        self.simulated.remove(id);
    }

    fn process_submit_failed(
        &mut self,
        pool: &mut TaskPool,
        id: &TaskId,
        event_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let Some(itask) = pool.get_task_mut(id) else {
            return;
        };
        itask.poll_timer = None;
        let mut update = job_update(itask);
        update.submit_status = Some(1);
        update.time_submit_exit = Some(event_time);

        let timer = itask.try_timers.entry(RetryPhase::Submission).or_default();
        if timer.next(now, false).is_some() {
            let message = retry_message(timer);
            info!(task = %id, "submission {message}");
            itask.state.reset(Some(TaskStatus::SubmitRetrying), None);
            itask.set_summary_message(&message);
            pool.db_mut().put_update_task_job(update);
        } else {
            itask.state.reset(Some(TaskStatus::SubmitFailed), None);
            pool.db_mut().put_update_task_job(update);
            pool.spawn_on_output(id, OUTPUT_SUBMIT_FAILED, now);
        }
    }

    fn process_custom(&mut self, pool: &mut TaskPool, id: &TaskId, message: &str, now: DateTime<Utc>) {
        let Some(itask) = pool.get_task_mut(id) else {
            return;
        };
        if itask.state.outputs.label_for_message(message).is_none() {
            return;
        }
        if let Some(label) = itask.state.outputs.set_msg_completed(message) {
            itask.state.is_updated = true;
            pool.spawn_on_output(id, &label, now);
        }
    }

    /// Complete a prepared submission that can never go out: a lookup or
    /// remote failure. No submission retry is used.
    pub(crate) fn submit_failed_without_retry(
        &mut self,
        pool: &mut TaskPool,
        id: &TaskId,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        let Some(itask) = pool.get_task_mut(id) else {
            return;
        };
        warn!(task = %id, %reason, "job submission failed");
        itask.local_job_file_path = None;
        itask.set_summary_message(&format!("{OUTPUT_SUBMIT_FAILED}: {reason}"));
        itask.state.reset(Some(TaskStatus::SubmitFailed), None);
        if itask.submit_num > 0 {
            let mut update = job_update(itask);
            update.submit_status = Some(1);
            update.time_submit_exit = Some(now);
            pool.db_mut().put_update_task_job(update);
        }
        pool.spawn_on_output(id, OUTPUT_SUBMIT_FAILED, now);
    }
}
