// src/subproc/pool.rs

//! Production command runner.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::errors::{Error, Result};
use crate::scheduler::SchedulerEvent;

use super::{CommandContext, CommandResult, CommandRunner, RET_CODE_WORKFLOW_STOPPING};

/// Runs commands as OS processes, at most `size` at once.
///
/// Internally this forwards contexts to a background loop, which spawns one
/// Tokio task per command once a semaphore permit is free.
pub struct SubProcPool {
    tx: mpsc::Sender<CommandContext>,
    stopping: Arc<AtomicBool>,
}

impl SubProcPool {
    /// Create the pool and start its dispatch loop.
    pub fn new(runtime_tx: mpsc::Sender<SchedulerEvent>, size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<CommandContext>(64);
        let stopping = Arc::new(AtomicBool::new(false));
        tokio::spawn(dispatch_loop(rx, runtime_tx, size.max(1), stopping.clone()));
        Self { tx, stopping }
    }
}

impl CommandRunner for SubProcPool {
    fn run_commands(
        &mut self,
        commands: Vec<CommandContext>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            for ctx in commands {
                tx.send(ctx).await.map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn close(&mut self) {
        info!("command pool closing; queued commands will be dropped");
        self.stopping.store(true, Ordering::SeqCst);
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<CommandContext>,
    runtime_tx: mpsc::Sender<SchedulerEvent>,
    size: usize,
    stopping: Arc<AtomicBool>,
) {
    info!(size, "command pool started");
    let permits = Arc::new(Semaphore::new(size));

    while let Some(ctx) = rx.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let tx = runtime_tx.clone();
        let stopping = stopping.clone();
        tokio::spawn(async move {
            let result = if stopping.load(Ordering::SeqCst) {
                CommandResult::new(ctx, RET_CODE_WORKFLOW_STOPPING, "", "workflow stopping")
            } else {
                run_command(ctx).await
            };
            drop(permit);
            if tx.send(SchedulerEvent::CommandCompleted(result)).await.is_err() {
                debug!("runtime gone; dropping command result");
            }
        });
    }

    info!("command pool finished (channel closed)");
}

/// Run one command to completion, capturing its output.
pub async fn run_command(ctx: CommandContext) -> CommandResult {
    match run_command_inner(&ctx).await {
        Ok((code, out, err)) => CommandResult::new(ctx, code, out, err),
        Err(e) => {
            warn!(kind = %ctx.kind, error = %e, "command could not be run");
            CommandResult::new(ctx, 1, "", format!("{e:#}"))
        }
    }
}

async fn run_command_inner(ctx: &CommandContext) -> anyhow::Result<(i32, String, String)> {
    let (program, args) = ctx
        .argv
        .split_first()
        .context("empty command line")?;

    debug!(kind = %ctx.kind, argv = ?ctx.argv, "running command");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if ctx.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {} command '{}'", ctx.kind, program))?;

    if let (Some(input), Some(mut stdin)) = (ctx.stdin.as_ref(), child.stdin.take()) {
        stdin
            .write_all(input.as_bytes())
            .await
            .with_context(|| format!("writing stdin of {} command", ctx.kind))?;
    }

    let output = child
        .wait_with_output()
        .await
        .with_context(|| format!("waiting for {} command", ctx.kind))?;

    Ok((
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subproc::CommandKind;

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let ctx = CommandContext::new(
            CommandKind::JobsPoll,
            vec!["sh".into(), "-c".into(), "cat; echo oops >&2; exit 3".into()],
        );
        let ctx = CommandContext {
            stdin: Some("hello\n".into()),
            ..ctx
        };
        let result = run_command(ctx).await;
        assert_eq!(result.ret_code, 3);
        assert_eq!(result.out, "hello\n");
        assert_eq!(result.err.trim(), "oops");
    }

    #[tokio::test]
    async fn missing_program_reports_failure() {
        let ctx = CommandContext::new(
            CommandKind::JobsKill,
            vec!["definitely-not-a-real-program-xyz".into()],
        );
        let result = run_command(ctx).await;
        assert_eq!(result.ret_code, 1);
        assert!(result.err.contains("spawning"));
    }

    #[tokio::test]
    async fn closed_pool_reports_stopping() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut pool = SubProcPool::new(tx, 1);
        pool.close();
        pool.run_commands(vec![CommandContext::new(
            CommandKind::JobsSubmit,
            vec!["true".into()],
        )])
        .await
        .unwrap();
        match rx.recv().await {
            Some(SchedulerEvent::CommandCompleted(r)) => {
                assert_eq!(r.ret_code, RET_CODE_WORKFLOW_STOPPING)
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
