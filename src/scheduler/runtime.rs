// src/scheduler/runtime.rs

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::errors::Result;
use crate::subproc::{CommandContext, CommandRunner};

use super::core::SchedulerCore;
use super::{CoreCommand, SchedulerEvent};

/// Drives the scheduler core from `SchedulerEvent`s and a main loop timer,
/// and delegates command execution to a `CommandRunner`.
///
/// All scheduling semantics live in `SchedulerCore`; this struct only
/// reads events, ticks, and passes commands on.
pub struct Runtime<R: CommandRunner> {
    core: SchedulerCore,
    event_rx: mpsc::Receiver<SchedulerEvent>,
    runner: R,
    tick: Duration,
}

impl<R: CommandRunner> fmt::Debug for Runtime<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl<R: CommandRunner> Runtime<R> {
    pub fn new(
        core: SchedulerCore,
        event_rx: mpsc::Receiver<SchedulerEvent>,
        runner: R,
        tick: Duration,
    ) -> Self {
        Self {
            core,
            event_rx,
            runner,
            tick,
        }
    }

    /// Main loop. Returns the core once the workflow has shut down, so
    /// callers can inspect the final state.
    pub async fn run(mut self) -> Result<SchedulerCore> {
        info!(tick = ?self.tick, "scheduler started");
        let mut ticker = time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                _ = ticker.tick() => SchedulerEvent::Tick,
                received = self.event_rx.recv() => match received {
                    Some(event) => event,
                    None => {
                        info!("event channel closed; exiting");
                        break;
                    }
                },
            };
            match &event {
                SchedulerEvent::Tick => trace!("tick"),
                other => debug!(event = ?other, "scheduler received event"),
            }

            let step = match self.core.step(event) {
                Ok(step) => step,
                Err(e) => {
                    self.runner.close();
                    return Err(e);
                }
            };
            for command in step.commands {
                self.execute_command(command).await?;
            }
            if !step.keep_running {
                break;
            }
        }

        info!("scheduler exiting");
        Ok(self.core)
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::RunCommands(commands) => self.run_commands(commands).await,
            CoreCommand::CloseRunner => {
                self.runner.close();
                Ok(())
            }
        }
    }

    async fn run_commands(&mut self, commands: Vec<CommandContext>) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let kinds: Vec<_> = commands.iter().map(|c| c.kind.as_str()).collect();
        debug!(?kinds, "dispatching commands");
        self.runner.run_commands(commands).await
    }
}
