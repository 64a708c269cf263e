// src/job/mod.rs

//! Job management: turning ready task instances into job commands and
//! command results back into task state changes.
//!
//! Nothing here runs a command. Submission, polling and killing push
//! [`CommandContext`]s onto an outbox that the scheduler loop drains into a
//! `CommandRunner`; each [`CommandResult`] comes back through
//! [`TaskJobManager::handle_command_result`] on a later iteration.
//!
//! - [`submit`]: preparation, remote initialisation, batching
//! - [`poll`]: poll result interpretation
//! - [`kill`]: killing active jobs
//! - [`events`]: `process_message`, the single place task state follows jobs
//! - [`run_modes`]: simulation and skip mode
//! - [`remote`], [`broadcast`], [`job_file`], [`output`]: supporting pieces

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::platform::Platform;
use crate::config::workflow::WorkflowConfig;
use crate::fs::FileSystem;
use crate::pool::TaskPool;
use crate::subproc::{CommandContext, CommandKind, CommandResult, RET_CODE_WORKFLOW_STOPPING};
use crate::task::{JobRef, TaskId};

pub mod broadcast;
pub mod events;
pub mod job_file;
pub mod kill;
pub mod output;
pub mod poll;
pub mod remote;
pub mod run_modes;
pub mod submit;

pub use broadcast::BroadcastManager;
pub use events::MessageFlag;
pub use remote::{RemoteInitStatus, TaskRemoteManager};

/// Summary messages shown while a job is not yet submitted.
pub const MSG_REMOTE_INIT: &str = "remote host initialising";
pub const MSG_PLATFORM_SELECT: &str = "waiting for platform selection";
pub const MSG_POLL_FAILED: &str = "poll failed";
pub const MSG_KILL_FAILED: &str = "kill failed";

#[derive(Debug)]
pub struct TaskJobManager {
    workflow_name: String,
    run_dir: PathBuf,
    job_cmd: Vec<String>,
    batch_size: usize,
    fs: Arc<dyn FileSystem>,
    remote: TaskRemoteManager,
    broadcasts: BroadcastManager,
    outbox: Vec<CommandContext>,
    simulated: BTreeMap<TaskId, run_modes::SimulatedJob>,
}

impl TaskJobManager {
    pub fn new(config: &WorkflowConfig, fs: Arc<dyn FileSystem>) -> Self {
        let global = &config.global;
        let seed = format!(
            "{}:{}:{}",
            global.workflow_name,
            global.run_dir.display(),
            std::process::id()
        );
        Self {
            workflow_name: global.workflow_name.clone(),
            run_dir: global.run_dir.clone(),
            job_cmd: global.job_cmd.clone(),
            batch_size: global.batch_size.max(1),
            fs,
            remote: TaskRemoteManager::new(&seed),
            broadcasts: BroadcastManager::new(),
            outbox: Vec::new(),
            simulated: BTreeMap::new(),
        }
    }

    pub fn broadcasts(&self) -> &BroadcastManager {
        &self.broadcasts
    }

    pub fn broadcasts_mut(&mut self) -> &mut BroadcastManager {
        &mut self.broadcasts
    }

    pub fn remote(&self) -> &TaskRemoteManager {
        &self.remote
    }

    /// Commands queued since the last call.
    pub fn take_commands(&mut self) -> Vec<CommandContext> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_pending_commands(&self) -> bool {
        !self.outbox.is_empty()
    }

    fn job_log_root(&self) -> PathBuf {
        self.run_dir.join("log").join("job")
    }

    /// argv for a job utility subcommand on `platform`, acting on `jobs`.
    fn job_command(&self, platform: &Platform, subcommand: &str, jobs: &[JobRef]) -> Vec<String> {
        let mut argv = Vec::new();
        if platform.is_remote() {
            argv.extend(platform.ssh_command.iter().cloned());
            argv.push(match &platform.owner {
                Some(owner) => format!("{owner}@{}", platform.host()),
                None => platform.host().to_string(),
            });
        }
        argv.extend(self.job_cmd.iter().cloned());
        argv.push(subcommand.to_string());
        argv.push(format!("--platform={}", platform.name));
        argv.push(format!("--job-runner={}", platform.job_runner));
        argv.push("--".to_string());
        argv.push(self.job_log_root().display().to_string());
        argv.extend(jobs.iter().map(JobRef::to_string));
        argv
    }

    fn push_job_command(
        &mut self,
        kind: CommandKind,
        platform: &Platform,
        jobs: Vec<JobRef>,
    ) {
        let argv = self.job_command(platform, kind.as_str(), &jobs);
        let mut ctx = CommandContext::new(kind, argv);
        ctx.job_refs = jobs;
        ctx.platform = Some(platform.name.clone());
        debug!(command = %ctx.kind, platform = %platform.name, jobs = ctx.job_refs.len(), "job command queued");
        self.outbox.push(ctx);
    }

    /// Apply a finished command's result.
    pub fn handle_command_result(
        &mut self,
        pool: &mut TaskPool,
        result: CommandResult,
        now: DateTime<Utc>,
    ) {
        if result.ret_code == RET_CODE_WORKFLOW_STOPPING {
            debug!(command = %result.ctx.kind, "ignoring command dropped at shutdown");
            return;
        }
        if result.ret_code != 0 && !result.err.trim().is_empty() {
            warn!(
                command = %result.ctx.kind,
                ret_code = result.ret_code,
                err = %result.err.trim(),
                "command reported errors"
            );
        }
        match &result.ctx.kind {
            CommandKind::JobsSubmit => self.submit_task_jobs_callback(pool, &result, now),
            CommandKind::JobsPoll => self.poll_task_jobs_callback(pool, &result, now),
            CommandKind::JobsKill => self.kill_task_jobs_callback(pool, &result, now),
            CommandKind::RemoteInit { .. } => self.remote.remote_init_callback(&result),
            CommandKind::HostSelect { .. } => self.remote.host_select_callback(&result),
        }
    }

    /// Look up the live instance a job line refers to.
    pub(crate) fn task_for_job(pool: &TaskPool, job: &JobRef) -> Option<TaskId> {
        let id = job.task_id();
        match pool.get_task(&id) {
            Some(itask) if itask.submit_num == job.submit_num => Some(id),
            Some(itask) => {
                debug!(
                    job = %job,
                    current = itask.submit_num,
                    "ignoring result for an earlier submission"
                );
                None
            }
            None => {
                debug!(job = %job, "ignoring result for a task no longer in the pool");
                None
            }
        }
    }
}
