// src/scheduler/mod.rs

//! The scheduler loop.
//!
//! Everything the scheduler reacts to arrives as a [`SchedulerEvent`]:
//! - command results from the subprocess pool
//! - messages from running jobs
//! - operator commands
//! - ticks of the main loop timer
//! - shutdown signals
//!
//! The pure core lives in [`core`]: it owns the task pool and job manager and
//! turns one event into a [`CoreStep`]. The async shell in [`runtime`] feeds
//! it events and hands the commands it returns to a `CommandRunner`.

use chrono::{DateTime, Utc};

use crate::config::model::RuntimeSection;
use crate::config::workflow::WorkflowConfig;
use crate::cycling::CyclePoint;
use crate::subproc::{CommandContext, CommandResult};
use crate::task::JobRef;
use crate::types::{Severity, StopMode};

pub mod core;
pub mod operator;
pub mod runtime;

pub use self::core::{SchedulerCore, SchedulerOptions};
pub use runtime::Runtime;

/// Events flowing into the scheduler loop.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A command handed to the runner has finished.
    CommandCompleted(CommandResult),
    /// A job reported progress directly.
    JobMessage {
        job: JobRef,
        severity: Severity,
        message: String,
        event_time: Option<DateTime<Utc>>,
    },
    Operator(OperatorCommand),
    /// Main loop timer: run one scheduling iteration.
    Tick,
    /// Ctrl-C or similar: stop now, leaving jobs running.
    ShutdownRequested,
}

/// Operator commands. Task items are `point/name[:status]` globs.
#[derive(Debug, Clone)]
pub enum OperatorCommand {
    Hold(Vec<String>),
    Release(Vec<String>),
    HoldAll,
    ReleaseAll,
    SetHoldPoint(CyclePoint),
    SetStopPoint(CyclePoint),
    Trigger(Vec<String>),
    /// Spawn the children of matching tasks as if `outputs` were completed.
    ForceSpawnChildren {
        items: Vec<String>,
        outputs: Vec<String>,
    },
    Kill(Vec<String>),
    Poll(Vec<String>),
    Remove(Vec<String>),
    Broadcast {
        point: Option<CyclePoint>,
        namespaces: Vec<String>,
        settings: Box<RuntimeSection>,
    },
    ClearBroadcast {
        point: Option<CyclePoint>,
        namespace: Option<String>,
    },
    /// Mark an external trigger satisfied, for every point if `point` is
    /// `None`.
    SatisfyXtrigger {
        label: String,
        point: Option<CyclePoint>,
    },
    SetQueueLimit {
        queue: String,
        limit: usize,
    },
    Reload(Box<WorkflowConfig>),
    Stop(StopMode),
}

/// Command produced by the core, to be executed by the async shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Hand these commands to the runner.
    RunCommands(Vec<CommandContext>),
    /// Stop the runner; anything not yet started is dropped.
    CloseRunner,
}

/// Outcome of handling one event.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the loop should keep running.
    pub keep_running: bool,
}
