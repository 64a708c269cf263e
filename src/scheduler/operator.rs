// src/scheduler/operator.rs

//! Applying operator commands to the core.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::errors::Result;

use super::core::SchedulerCore;
use super::OperatorCommand;

fn warn_unmatched(command: &str, bad: &[String]) {
    for item in bad {
        warn!(%command, %item, "no matching task instance");
    }
}

impl SchedulerCore {
    /// Apply one operator command. Only integrity violations (for example a
    /// limit for an unknown queue) are errors.
    pub(super) fn handle_operator_command(
        &mut self,
        command: OperatorCommand,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let OperatorCommand::Stop(mode) = command {
            self.set_stop_mode(mode);
            return Ok(());
        }
        let (pool, jobs, oracle) = self.parts_mut();
        match command {
            OperatorCommand::Hold(items) => warn_unmatched("hold", &pool.hold_tasks(&items)),
            OperatorCommand::Release(items) => {
                warn_unmatched("release", &pool.release_tasks(&items))
            }
            OperatorCommand::HoldAll => pool.hold_all_tasks(),
            OperatorCommand::ReleaseAll => pool.release_all_tasks(),
            OperatorCommand::SetHoldPoint(point) => pool.set_hold_point(point),
            OperatorCommand::SetStopPoint(point) => {
                pool.set_stop_point(point);
            }
            OperatorCommand::Trigger(items) => {
                warn_unmatched("trigger", &pool.trigger_tasks(&items, now))
            }
            OperatorCommand::ForceSpawnChildren { items, outputs } => warn_unmatched(
                "spawn",
                &pool.force_spawn_children(&items, &outputs, now),
            ),
            OperatorCommand::Kill(items) => {
                let (ids, bad) = pool.filter_task_proxies(&items);
                warn_unmatched("kill", &bad);
                jobs.kill_task_jobs(pool, &ids, now);
            }
            OperatorCommand::Poll(items) => {
                let (ids, bad) = pool.filter_task_proxies(&items);
                warn_unmatched("poll", &bad);
                jobs.poll_task_jobs(pool, &ids, false);
            }
            OperatorCommand::Remove(items) => warn_unmatched("remove", &pool.remove_tasks(&items)),
            OperatorCommand::Broadcast {
                point,
                namespaces,
                settings,
            } => {
                for namespace in &namespaces {
                    jobs.broadcasts_mut().put_broadcast(point, namespace, &settings);
                }
            }
            OperatorCommand::ClearBroadcast { point, namespace } => {
                let n = jobs
                    .broadcasts_mut()
                    .clear_broadcast(point, namespace.as_deref());
                info!(cleared = n, "broadcasts cleared");
            }
            OperatorCommand::SatisfyXtrigger { label, point } => {
                info!(xtrigger = %label, "xtrigger satisfied by request");
                oracle.satisfy_xtrigger(&label, point);
            }
            OperatorCommand::SetQueueLimit { queue, limit } => pool.set_queue_limit(&queue, limit)?,
            OperatorCommand::Reload(config) => {
                oracle.on_reload(&config);
                pool.reload(*config);
            }
            OperatorCommand::Stop(_) => {}
        }
        Ok(())
    }
}
