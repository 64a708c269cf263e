// src/job/kill.rs

//! Killing active jobs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::platform::Platform;
use crate::pool::TaskPool;
use crate::subproc::{CommandKind, CommandResult, RET_CODE_WORKFLOW_STOPPING};
use crate::task::outputs::{OUTPUT_FAILED, OUTPUT_SUBMIT_FAILED};
use crate::task::{JobRef, TaskId, TaskStatus};
use crate::types::Severity;

use super::events::MessageFlag;
use super::output::{parse_job_lines, LineKind};
use super::{TaskJobManager, MSG_KILL_FAILED};

impl TaskJobManager {
    /// Hold and kill the jobs of active instances among `ids`. Returns the
    /// instances a kill was issued for. Simulated jobs die at once.
    pub fn kill_task_jobs(
        &mut self,
        pool: &mut TaskPool,
        ids: &[TaskId],
        now: DateTime<Utc>,
    ) -> Vec<TaskId> {
        let mut by_platform: BTreeMap<String, (Platform, Vec<JobRef>)> = BTreeMap::new();
        let mut killed = Vec::new();
        let mut simulated = Vec::new();
        for id in ids {
            let Some(itask) = pool.get_task_mut(id) else {
                continue;
            };
            if !itask.state.is(&TaskStatus::ACTIVE) {
                continue;
            }
            itask.state.reset(None, Some(true));
            if itask.run_mode.map(|m| m.is_ghost()).unwrap_or(false) {
                simulated.push(id.clone());
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
            killed.push(id.clone());
        }
        for (name, (platform, jobs)) in by_platform {
            info!(platform = %name, jobs = jobs.len(), "killing jobs");
            self.push_job_command(CommandKind::JobsKill, &platform, jobs);
        }
        for id in simulated {
            self.simulated.remove(&id);
            self.process_message(
                pool,
                &id,
                Severity::Critical,
                OUTPUT_FAILED,
                Some(now),
                MessageFlag::Received,
                now,
            );
            killed.push(id);
        }
        killed
    }

    pub(crate) fn kill_task_jobs_callback(
        &mut self,
        pool: &mut TaskPool,
        result: &CommandResult,
        now: DateTime<Utc>,
    ) {
        for line in parse_job_lines(result, now) {
            if line.kind != LineKind::Summary {
                continue;
            }
            let ret_code = line.field(0).and_then(|r| r.parse::<i32>().ok()).unwrap_or(1);
            if ret_code == RET_CODE_WORKFLOW_STOPPING {
                continue;
            }
            let Some(id) = Self::task_for_job(pool, &line.job) else {
                continue;
            };
            let Some(itask) = pool.get_task_mut(&id) else {
                continue;
            };
            if ret_code != 0 {
                warn!(task = %id, ret_code, "kill failed: job may still be running");
                itask.state.kill_failed = true;
                itask.state.is_updated = true;
                itask.set_summary_message(MSG_KILL_FAILED);
                continue;
            }
            info!(task = %id, "job killed");
            itask.state.kill_failed = false;
            let message = match itask.state.status {
                TaskStatus::Submitted => OUTPUT_SUBMIT_FAILED,
                TaskStatus::Running => OUTPUT_FAILED,
                _ => continue,
            };
            self.process_message(
                pool,
                &id,
                Severity::Critical,
                message,
                Some(now),
                MessageFlag::Received,
                now,
            );
        }
    }
}
