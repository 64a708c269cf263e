// src/job/submit.rs

//! Job submission.
//!
//! Each candidate is prepared once (platform, broadcasts, submit number,
//! retry delays, job file), then candidates are grouped by platform. A
//! platform whose remote is not initialised yet holds its tasks back until
//! initialisation finishes; the others are split into batches, one submit
//! command per batch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::platform::{platform_select_command, Platform, LOCALHOST};
use crate::config::runtime::RuntimeConfig;
use crate::pool::TaskPool;
use crate::subproc::{CommandKind, CommandResult, RET_CODE_WORKFLOW_STOPPING};
use crate::task::outputs::{OUTPUT_SUBMITTED, OUTPUT_SUBMIT_FAILED};
use crate::task::{TaskId, TaskStatus};
use crate::types::{RunMode, Severity};

use super::events::MessageFlag;
use super::job_file::{write_job_file, JobConf};
use super::output::{parse_job_lines, LineKind};
use super::remote::RemoteInitStatus;
use super::{TaskJobManager, MSG_PLATFORM_SELECT, MSG_REMOTE_INIT};

/// Outcome of preparing one task for submission.
#[derive(Debug)]
enum Prep {
    /// Job file written; submit through the platform.
    Ready,
    /// Waiting on something asynchronous; try again next time.
    Pending,
    /// Runs in-process under a ghost run mode.
    Ghost(RunMode, Box<RuntimeConfig>),
    Failed(String),
}

/// Batch size that spreads `n` jobs evenly over the fewest batches of at
/// most `batch_size` + 1.
pub fn batch_chunk_size(n: usize, batch_size: usize) -> usize {
    let batch_size = batch_size.max(1);
    n / ((n / batch_size) + 1) + 1
}

impl TaskJobManager {
    /// Prepare and submit jobs for ready task instances. Returns the
    /// instances that were dispatched or run in-process.
    pub fn submit_task_jobs(
        &mut self,
        pool: &mut TaskPool,
        ids: &[TaskId],
        now: DateTime<Utc>,
    ) -> Vec<TaskId> {
        let mut done = Vec::new();
        let mut by_platform: BTreeMap<String, (Platform, Vec<TaskId>)> = BTreeMap::new();

        for id in ids {
            match self.prep_submit_task_job(pool, id) {
                Prep::Ready => {
                    let Some(platform) = pool.get_task(id).and_then(|t| t.platform.clone()) else {
                        continue;
                    };
                    by_platform
                        .entry(platform.name.clone())
                        .or_insert_with(|| (platform, Vec::new()))
                        .1
                        .push(id.clone());
                }
                Prep::Pending => {}
                Prep::Ghost(mode, rtconfig) => {
                    self.submit_ghost_job(pool, id, mode, &rtconfig, now);
                    done.push(id.clone());
                }
                Prep::Failed(reason) => {
                    self.submit_failed_without_retry(pool, id, &reason, now);
                }
            }
        }

        for (name, (platform, ids)) in by_platform {
            match self.remote.remote_init_status(&platform) {
                Some(RemoteInitStatus::NotRequired) | Some(RemoteInitStatus::Done) => {}
                Some(RemoteInitStatus::Pending) => {
                    Self::set_messages(pool, &ids, MSG_REMOTE_INIT);
                    continue;
                }
                Some(RemoteInitStatus::Failed) => {
                    for id in &ids {
                        self.submit_failed_without_retry(pool, id, "remote init failed", now);
                    }
                    continue;
                }
                None => {
                    if let Some(ctx) =
                        self.remote
                            .remote_init(&platform, &self.job_cmd, &self.run_dir)
                    {
                        self.outbox.push(ctx);
                    }
                    Self::set_messages(pool, &ids, MSG_REMOTE_INIT);
                    continue;
                }
            }

            let chunk = batch_chunk_size(ids.len(), self.batch_size);
            for batch in ids.chunks(chunk) {
                let mut jobs = Vec::with_capacity(batch.len());
                for id in batch {
                    let Some(itask) = pool.get_task_mut(id) else {
                        continue;
                    };
                    itask.local_job_file_path = None;
                    itask.state.reset(Some(TaskStatus::Ready), None);
                    jobs.push(itask.job_ref());
                    pool.put_insert_task_job(id, now);
                }
                info!(platform = %name, jobs = jobs.len(), "submitting jobs");
                done.extend(jobs.iter().map(|j| j.task_id()));
                self.push_job_command(CommandKind::JobsSubmit, &platform, jobs);
            }
        }

        self.remote.host_select_reset();
        done
    }

    fn set_messages(pool: &mut TaskPool, ids: &[TaskId], message: &str) {
        for id in ids {
            if let Some(itask) = pool.get_task_mut(id) {
                itask.set_summary_message(message);
            }
        }
    }

    /// Run mode for a task: a non-live workflow mode applies to every task,
    /// otherwise the task's own setting (default live).
    fn effective_run_mode(workflow_mode: RunMode, rtconfig: &RuntimeConfig) -> RunMode {
        match workflow_mode {
            RunMode::Live => rtconfig.run_mode.unwrap_or(RunMode::Live),
            other => other,
        }
    }

    fn prep_submit_task_job(&mut self, pool: &mut TaskPool, id: &TaskId) -> Prep {
        let config = pool.config().clone();
        let Some(itask) = pool.get_task_mut(id) else {
            return Prep::Failed("task not in pool".to_string());
        };
        if itask.local_job_file_path.is_some() {
            // Prepared on an earlier pass; waiting on remote init.
            return Prep::Ready;
        }

        let rtconfig = match self.broadcasts.get_rtconfig(&itask.tdef, itask.point()) {
            Ok(rt) => rt,
            Err(e) => return Prep::Failed(format!("invalid runtime: {e}")),
        };
        let run_mode = Self::effective_run_mode(config.run_mode, &rtconfig);

        let platform = if run_mode.is_ghost() {
            None
        } else {
            let configured = rtconfig.platform.clone().unwrap_or_else(|| LOCALHOST.to_string());
            let name = match platform_select_command(&configured) {
                Some(expr) => match self.remote.subshell_eval(expr, &mut self.outbox) {
                    Ok(Some(selected)) => selected,
                    Ok(None) => {
                        itask.set_summary_message(MSG_PLATFORM_SELECT);
                        return Prep::Pending;
                    }
                    Err(e) => return Prep::Failed(e),
                },
                None => configured.clone(),
            };
            match config.platform(&name) {
                Ok(p) => Some(p.clone()),
                Err(e) => return Prep::Failed(e.to_string()),
            }
        };

        itask.submit_num += 1;
        itask.run_mode = Some(run_mode);
        itask.summary.platforms_used.insert(
            itask.submit_num,
            platform
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_else(|| run_mode.to_string()),
        );
        itask.summary.execution_time_limit = rtconfig.execution_time_limit;
        itask.summary.job_runner_name = platform.as_ref().map(|p| p.job_runner.clone());
        itask.summary.job_id = None;
        itask.summary.run_signal = None;
        itask.summary.started_time = None;
        itask.summary.finished_time = None;
        let submission_delays = rtconfig
            .submission_retry_delays
            .clone()
            .or_else(|| platform.as_ref().map(|p| p.submission_retry_delays.clone()))
            .unwrap_or_default();
        itask.set_retry_delays(rtconfig.execution_retry_delays.clone(), submission_delays);
        itask.platform = platform;
        itask.jobs.push(itask.job_ref().to_string());
        itask.state.is_updated = true;
        debug!(task = %id, submit_num = itask.submit_num, %run_mode, "prepared job");

        if run_mode.is_ghost() {
            return Prep::Ghost(run_mode, Box::new(rtconfig));
        }

        let log_dir = itask.job_log_dir(&self.run_dir);
        let job_runner = itask
            .platform
            .as_ref()
            .map(|p| p.job_runner.clone())
            .unwrap_or_default();
        let conf = JobConf {
            workflow_name: &self.workflow_name,
            itask,
            rtconfig: &rtconfig,
            job_runner: &job_runner,
            dummy: run_mode == RunMode::Dummy,
        };
        match write_job_file(self.fs.as_ref(), &log_dir, &conf) {
            Ok(path) => {
                itask.local_job_file_path = Some(path);
                Prep::Ready
            }
            Err(e) => Prep::Failed(format!("{e:#}")),
        }
    }

    pub(crate) fn submit_task_jobs_callback(
        &mut self,
        pool: &mut TaskPool,
        result: &CommandResult,
        now: DateTime<Utc>,
    ) {
        for line in parse_job_lines(result, now) {
            match line.kind {
                LineKind::Command => {
                    debug!(job = %line.job, output = %line.fields.join("|"), "job runner output");
                    continue;
                }
                LineKind::Message => continue,
                LineKind::Summary => {}
            }
            let ret_code = line.field(0).and_then(|r| r.parse::<i32>().ok()).unwrap_or(1);
            if ret_code == RET_CODE_WORKFLOW_STOPPING {
                continue;
            }
            let Some(id) = Self::task_for_job(pool, &line.job) else {
                continue;
            };
            match (ret_code, line.field(1)) {
                (0, Some(job_id)) => {
                    if let Some(itask) = pool.get_task_mut(&id) {
                        itask.summary.job_id = Some(job_id.to_string());
                    }
                    self.process_message(
                        pool,
                        &id,
                        Severity::Info,
                        OUTPUT_SUBMITTED,
                        None,
                        MessageFlag::Received,
                        now,
                    );
                }
                _ => {
                    self.process_message(
                        pool,
                        &id,
                        Severity::Critical,
                        OUTPUT_SUBMIT_FAILED,
                        None,
                        MessageFlag::Received,
                        now,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_are_even_and_bounded() {
        assert_eq!(batch_chunk_size(3, 100), 4);
        assert_eq!(batch_chunk_size(250, 100), 84);
        assert_eq!(batch_chunk_size(0, 100), 1);
        assert_eq!(batch_chunk_size(7, 2), 2);
    }
}
