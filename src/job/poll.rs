// src/job/poll.rs

//! Polling jobs and interpreting poll results.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::config::platform::Platform;
use crate::persistence::TaskJobUpdate;
use crate::pool::TaskPool;
use crate::subproc::{CommandKind, CommandResult};
use crate::task::outputs::{OUTPUT_FAILED, OUTPUT_STARTED, OUTPUT_SUBMITTED, OUTPUT_SUBMIT_FAILED, OUTPUT_SUCCEEDED};
use crate::task::{JobRef, TaskId, TaskProxy, TaskStatus};
use crate::types::Severity;

use super::events::MessageFlag;
use super::output::{parse_job_lines, JobLine, LineKind};
use super::{TaskJobManager, MSG_POLL_FAILED};

/// Prefix of the message recording the signal a job died from.
pub const FAIL_MESSAGE_PREFIX: &str = "failed/";
/// Signal recorded when a job is found running past its time limit.
pub const TIME_LIMIT_SIGNAL: &str = "XCPU";

/// What a poll found out about one job.
///
/// Poll summary fields, in order: run status, run signal, job-runner-exit
/// flag, submit exit time, run start time, run exit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPollContext {
    pub job: JobRef,
    /// Exit status once the job has finished: 0 success, 1 failure.
    pub run_status: Option<i32>,
    pub run_signal: Option<String>,
    /// The job runner no longer knows about the job.
    pub exit_polled: bool,
    pub time_submit_exit: Option<String>,
    pub time_run: Option<String>,
    pub time_run_exit: Option<String>,
}

/// The state a poll result implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Submitted,
    SubmitFailed,
    Running,
    Succeeded,
    /// Failed, with the signal if it was killed by one.
    Failed { signal: Option<String> },
}

impl JobPollContext {
    pub fn from_line(line: &JobLine) -> Result<Self, String> {
        if line.fields.len() < 6 {
            return Err(format!("incomplete poll summary for {}", line.job));
        }
        let run_status = line
            .field(0)
            .map(|s| {
                s.parse::<i32>()
                    .map_err(|e| format!("bad run status for {}: {e}", line.job))
            })
            .transpose()?;
        let exit_polled = matches!(line.field(2), Some("1") | Some("true"));
        Ok(Self {
            job: line.job.clone(),
            run_status,
            run_signal: line.field(1).map(str::to_string),
            exit_polled,
            time_submit_exit: line.field(3).map(str::to_string),
            time_run: line.field(4).map(str::to_string),
            time_run_exit: line.field(5).map(str::to_string),
        })
    }

    pub fn outcome(&self) -> PollOutcome {
        let trapped = matches!(self.run_signal.as_deref(), Some("ERR") | Some("EXIT"));
        match self.run_status {
            Some(1) if trapped => PollOutcome::Failed { signal: None },
            // Killed by a signal and gone from the job runner: no trap ran.
            Some(1) if self.exit_polled => PollOutcome::Failed {
                signal: self.run_signal.clone(),
            },
            // Terminated, but the trap has not reported yet.
            Some(1) => PollOutcome::Running,
            Some(0) => PollOutcome::Succeeded,
            Some(_) => PollOutcome::Failed {
                signal: self.run_signal.clone(),
            },
            None if self.time_run.is_some() && self.exit_polled => {
                PollOutcome::Failed { signal: None }
            }
            None if self.time_run.is_some() => PollOutcome::Running,
            None if self.exit_polled => PollOutcome::SubmitFailed,
            None => PollOutcome::Submitted,
        }
    }
}

impl PollOutcome {
    /// Job messages equivalent to this outcome, in the order to apply them.
    pub fn messages(&self) -> Vec<String> {
        match self {
            PollOutcome::Submitted => vec![OUTPUT_SUBMITTED.to_string()],
            PollOutcome::SubmitFailed => vec![OUTPUT_SUBMIT_FAILED.to_string()],
            PollOutcome::Running => vec![OUTPUT_STARTED.to_string()],
            PollOutcome::Succeeded => vec![OUTPUT_SUCCEEDED.to_string()],
            PollOutcome::Failed { signal: Some(signal) } => {
                vec![format!("{FAIL_MESSAGE_PREFIX}{signal}")]
            }
            PollOutcome::Failed { signal: None } => vec![OUTPUT_FAILED.to_string()],
        }
    }
}

/// Has a running job outlived its execution time limit?
fn past_time_limit(itask: &TaskProxy, now: DateTime<Utc>) -> bool {
    match (itask.summary.started_time, itask.summary.execution_time_limit) {
        (Some(started), Some(limit)) => {
            started + TimeDelta::from_std(limit).unwrap_or(TimeDelta::MAX) < now
        }
        _ => false,
    }
}

impl TaskJobManager {
    /// Poll the jobs of `ids`. Only instances with a job that may still be
    /// known to a job runner are polled; with `poll_succeeded`, succeeded
    /// ones are polled too. Returns the instances polled.
    pub fn poll_task_jobs(
        &mut self,
        pool: &mut TaskPool,
        ids: &[TaskId],
        poll_succeeded: bool,
    ) -> Vec<TaskId> {
        let mut statuses = vec![TaskStatus::Submitted, TaskStatus::Running, TaskStatus::Failed];
        if poll_succeeded {
            statuses.push(TaskStatus::Succeeded);
        }
        let mut by_platform: BTreeMap<String, (Platform, Vec<JobRef>)> = BTreeMap::new();
        let mut polled = Vec::new();
        for id in ids {
            let Some(itask) = pool.get_task(id) else {
                continue;
            };
            if !itask.state.is(&statuses)
                || itask.submit_num == 0
                || itask.run_mode.map(|m| m.is_ghost()).unwrap_or(false)
            {
                continue;
            }
            let Some(platform) = itask.platform.clone() else {
                continue;
            };
            by_platform
                .entry(platform.name.clone())
                .or_insert_with(|| (platform, Vec::new()))
                .1
                .push(itask.job_ref());
            polled.push(id.clone());
        }
        for (name, (platform, jobs)) in by_platform {
            debug!(platform = %name, jobs = jobs.len(), "polling jobs");
            self.push_job_command(CommandKind::JobsPoll, &platform, jobs);
        }
        polled
    }

    /// Poll submitted and running jobs whose poll timer is due, advancing
    /// each timer. Returns the instances polled.
    pub fn check_task_jobs(&mut self, pool: &mut TaskPool, now: DateTime<Utc>) -> Vec<TaskId> {
        let due: Vec<TaskId> = pool
            .get_tasks()
            .filter(|t| t.state.is(&[TaskStatus::Submitted, TaskStatus::Running]))
            .filter(|t| {
                t.poll_timer
                    .as_ref()
                    .map(|timer| timer.is_timeout_set() && timer.is_delay_done(now))
                    .unwrap_or(false)
            })
            .map(|t| t.identity.clone())
            .collect();
        for id in &due {
            if let Some(timer) = pool.get_task_mut(id).and_then(|t| t.poll_timer.as_mut()) {
                timer.next(now, true);
            }
        }
        if !due.is_empty() {
            info!(count = due.len(), "polling jobs whose poll timer is due");
        }
        self.poll_task_jobs(pool, &due, false)
    }

    pub(crate) fn poll_task_jobs_callback(
        &mut self,
        pool: &mut TaskPool,
        result: &CommandResult,
        now: DateTime<Utc>,
    ) {
        for line in parse_job_lines(result, now) {
            let Some(id) = Self::task_for_job(pool, &line.job) else {
                continue;
            };
            match line.kind {
                LineKind::Command => {}
                LineKind::Message => self.poll_message_line(pool, &id, &line, now),
                LineKind::Summary => self.poll_summary_line(pool, &id, &line, now),
            }
        }
    }

    fn poll_message_line(&mut self, pool: &mut TaskPool, id: &TaskId, line: &JobLine, now: DateTime<Utc>) {
        let (Some(event_time), Some(severity), Some(message)) =
            (line.field(0), line.field(1), line.field(2))
        else {
            warn!(job = %line.job, "unhandled poll message line");
            return;
        };
        let event_time = DateTime::parse_from_rfc3339(event_time)
            .ok()
            .map(|t| t.with_timezone(&Utc));
        let severity = severity.parse::<Severity>().unwrap_or_default();
        self.process_message(pool, id, severity, message, event_time, MessageFlag::Polled, now);
    }

    fn poll_summary_line(&mut self, pool: &mut TaskPool, id: &TaskId, line: &JobLine, now: DateTime<Utc>) {
        let ctx = match JobPollContext::from_line(line) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(task = %id, "{e}");
                if let Some(itask) = pool.get_task_mut(id) {
                    itask.set_summary_message(MSG_POLL_FAILED);
                }
                return;
            }
        };
        let Some(itask) = pool.get_task(id) else {
            return;
        };

        let mut outcome = ctx.outcome();
        if outcome == PollOutcome::Running && past_time_limit(itask, now) {
            warn!(task = %id, "job running past its execution time limit");
            outcome = PollOutcome::Failed {
                signal: Some(TIME_LIMIT_SIGNAL.to_string()),
            };
        }
        let mut update = TaskJobUpdate::new(itask.point(), itask.name(), itask.submit_num);
        update.run_status = ctx.run_status;
        update.run_signal = ctx.run_signal.clone();
        let parse = |s: &Option<String>| {
            s.as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc))
        };
        update.time_submit_exit = parse(&ctx.time_submit_exit);
        update.time_run = parse(&ctx.time_run);
        update.time_run_exit = parse(&ctx.time_run_exit);
        pool.db_mut().put_update_task_job(update);

        let event_time = parse(&ctx.time_run_exit).or(parse(&ctx.time_run));
        debug!(task = %id, ?outcome, "poll result");
        for message in outcome.messages() {
            let severity = match outcome {
                PollOutcome::Failed { .. } | PollOutcome::SubmitFailed => Severity::Critical,
                _ => Severity::Info,
            };
            self.process_message(pool, id, severity, &message, event_time, MessageFlag::Polled, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycling::CyclePoint;
    use crate::task::TaskId;

    fn ctx(run_status: Option<i32>, signal: Option<&str>, exit_polled: bool, time_run: bool) -> JobPollContext {
        JobPollContext {
            job: JobRef::new(&TaskId::new("foo", CyclePoint::new(1)), 1),
            run_status,
            run_signal: signal.map(str::to_string),
            exit_polled,
            time_submit_exit: None,
            time_run: time_run.then(|| "2026-01-01T00:00:00Z".to_string()),
            time_run_exit: None,
        }
    }

    #[test]
    fn decision_table() {
        use PollOutcome::*;
        let cases = [
            (ctx(Some(1), Some("ERR"), false, true), Failed { signal: None }),
            (ctx(Some(1), Some("EXIT"), true, true), Failed { signal: None }),
            (
                ctx(Some(1), Some("TERM"), true, true),
                Failed {
                    signal: Some("TERM".into()),
                },
            ),
            (ctx(Some(1), Some("TERM"), false, true), Running),
            (ctx(Some(0), None, true, true), Succeeded),
            (ctx(None, None, true, true), Failed { signal: None }),
            (ctx(None, None, false, true), Running),
            (ctx(None, None, true, false), SubmitFailed),
            (ctx(None, None, false, false), Submitted),
        ];
        for (ctx, expected) in cases {
            assert_eq!(ctx.outcome(), expected, "{ctx:?}");
        }
    }

    #[test]
    fn signalled_failure_carries_the_signal() {
        let outcome = PollOutcome::Failed {
            signal: Some("KILL".into()),
        };
        assert_eq!(outcome.messages(), vec!["failed/KILL"]);
        assert_eq!(PollOutcome::Running.messages(), vec!["started"]);
    }

    #[test]
    fn parses_summary_fields() {
        let line = JobLine::parse("[TASK JOB SUMMARY]t|2/foo/03|1|TERM|1||2026-01-01T00:00:00Z|")
            .expect("prefixed")
            .expect("valid");
        let ctx = JobPollContext::from_line(&line).expect("poll context");
        assert_eq!(ctx.job.submit_num, 3);
        assert_eq!(ctx.run_status, Some(1));
        assert!(ctx.exit_polled);
        assert_eq!(ctx.time_submit_exit, None);
        assert!(ctx.time_run.is_some());

        let short = JobLine::parse("[TASK JOB SUMMARY]t|2/foo/03|1")
            .expect("prefixed")
            .expect("valid");
        assert!(JobPollContext::from_line(&short).is_err());
    }
}
