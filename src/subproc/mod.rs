// src/subproc/mod.rs

//! External command execution.
//!
//! The scheduler never runs commands itself: it hands [`CommandContext`]s to a
//! [`CommandRunner`], which runs them concurrently and reports each
//! [`CommandResult`] back as a `SchedulerEvent::CommandCompleted` message.
//! Results are applied on the scheduler loop, one at a time.
//!
//! - [`SubProcPool`] is the production runner (`tokio::process`, bounded by a
//!   semaphore).
//! - Tests provide their own runner that replies with canned output.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;
use crate::task::JobRef;

pub mod pool;

pub use pool::SubProcPool;

/// Return code reported for commands dropped because the workflow is stopping.
pub const RET_CODE_WORKFLOW_STOPPING: i32 = 999;

/// What a command is for; decides which handler gets its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    JobsSubmit,
    JobsPoll,
    JobsKill,
    /// Prepare a remote `(host, owner)` for jobs.
    RemoteInit {
        host: String,
        owner: Option<String>,
    },
    /// Run a host/platform selection expression.
    HostSelect { expr: String },
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::JobsSubmit => "jobs-submit",
            CommandKind::JobsPoll => "jobs-poll",
            CommandKind::JobsKill => "jobs-kill",
            CommandKind::RemoteInit { .. } => "remote-init",
            CommandKind::HostSelect { .. } => "host-select",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command to run, plus what the scheduler needs to interpret its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    pub kind: CommandKind,
    pub argv: Vec<String>,
    pub stdin: Option<String>,
    /// Jobs this command acts on, in the order given on the command line.
    pub job_refs: Vec<JobRef>,
    /// Platform the command targets, if any.
    pub platform: Option<String>,
}

impl CommandContext {
    pub fn new(kind: CommandKind, argv: Vec<String>) -> Self {
        Self {
            kind,
            argv,
            stdin: None,
            job_refs: Vec::new(),
            platform: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub ctx: CommandContext,
    pub ret_code: i32,
    pub out: String,
    pub err: String,
}

impl CommandResult {
    pub fn new(ctx: CommandContext, ret_code: i32, out: impl Into<String>, err: impl Into<String>) -> Self {
        Self {
            ctx,
            ret_code,
            out: out.into(),
            err: err.into(),
        }
    }
}

/// Trait abstracting how commands are executed.
pub trait CommandRunner: Send {
    /// Queue commands for execution. Returns once they are dispatched; results
    /// arrive later as events.
    fn run_commands(
        &mut self,
        commands: Vec<CommandContext>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop accepting work; anything not yet started completes with
    /// [`RET_CODE_WORKFLOW_STOPPING`].
    fn close(&mut self) {}
}
