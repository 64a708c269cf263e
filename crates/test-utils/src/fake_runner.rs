use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;

use cycler::errors::Result;
use cycler::job::output::{timestamp, PREFIX_SUMMARY};
use cycler::scheduler::SchedulerEvent;
use cycler::subproc::{CommandContext, CommandKind, CommandResult, CommandRunner};
use cycler::task::JobRef;
use cycler::types::Severity;

/// `[TASK JOB SUMMARY]<now>|<job>|<fields...>`
pub fn summary_line(job: &JobRef, fields: &[&str]) -> String {
    format!(
        "{PREFIX_SUMMARY}{}|{job}|{}",
        timestamp(Utc::now()),
        fields.join("|")
    )
}

/// Result reporting every job of a submit command as accepted, with job ids
/// `1000`, `1001`, ...
pub fn submit_ok(ctx: &CommandContext) -> CommandResult {
    let out: Vec<String> = ctx
        .job_refs
        .iter()
        .enumerate()
        .map(|(i, job)| summary_line(job, &["0", &(1000 + i).to_string()]))
        .collect();
    CommandResult::new(ctx.clone(), 0, out.join("\n"), "")
}

/// Job messages a well-behaved job sends after a successful submission.
pub type MessageScript = Vec<&'static str>;

/// A fake runner that:
/// - records every command it is given
/// - answers each command immediately through the runtime channel
/// - after a submit, plays `messages` for each job as if the job sent them.
pub struct FakeCommandRunner {
    runtime_tx: mpsc::Sender<SchedulerEvent>,
    dispatched: Arc<Mutex<Vec<CommandContext>>>,
    messages: MessageScript,
    closed: Arc<AtomicBool>,
}

impl FakeCommandRunner {
    pub fn new(
        runtime_tx: mpsc::Sender<SchedulerEvent>,
        dispatched: Arc<Mutex<Vec<CommandContext>>>,
    ) -> Self {
        Self {
            runtime_tx,
            dispatched,
            messages: vec!["started", "succeeded"],
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Messages each submitted job sends.
    pub fn with_messages(mut self, messages: MessageScript) -> Self {
        self.messages = messages;
        self
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl CommandRunner for FakeCommandRunner {
    fn run_commands(
        &mut self,
        commands: Vec<CommandContext>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let dispatched = Arc::clone(&self.dispatched);
        let messages = self.messages.clone();

        Box::pin(async move {
            for ctx in commands {
                {
                    let mut guard = dispatched.lock().unwrap();
                    guard.push(ctx.clone());
                }

                let result = match &ctx.kind {
                    CommandKind::JobsSubmit => submit_ok(&ctx),
                    CommandKind::JobsPoll | CommandKind::JobsKill => {
                        let out: Vec<String> = ctx
                            .job_refs
                            .iter()
                            .map(|job| summary_line(job, &["0"]))
                            .collect();
                        CommandResult::new(ctx.clone(), 0, out.join("\n"), "")
                    }
                    CommandKind::RemoteInit { .. } => CommandResult::new(ctx.clone(), 0, "", ""),
                    CommandKind::HostSelect { .. } => {
                        CommandResult::new(ctx.clone(), 0, "localhost\n", "")
                    }
                };
                let submitted = result.ctx.kind == CommandKind::JobsSubmit;
                let jobs = result.ctx.job_refs.clone();
                tx.send(SchedulerEvent::CommandCompleted(result))
                    .await
                    .map_err(anyhow::Error::from)?;

                if submitted {
                    for job in jobs {
                        for message in &messages {
                            tx.send(SchedulerEvent::JobMessage {
                                job: job.clone(),
                                severity: Severity::Info,
                                message: message.to_string(),
                                event_time: None,
                            })
                            .await
                            .map_err(anyhow::Error::from)?;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
