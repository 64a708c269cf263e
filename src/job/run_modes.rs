// src/job/run_modes.rs

//! Run modes that never submit a job.
//!
//! - Simulation: the task is marked submitted and started at once, then
//!   succeeds (or fails at configured points) once its simulated run
//!   length has passed. [`TaskJobManager::sim_time_check`] does the
//!   finishing on each iteration.
//! - Skip: the task reports its outputs immediately.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

use crate::config::runtime::RuntimeConfig;
use crate::pool::TaskPool;
use crate::task::outputs::{
    normalise_output_label, OUTPUT_FAILED, OUTPUT_STARTED, OUTPUT_SUBMITTED, OUTPUT_SUCCEEDED,
};
use crate::task::{TaskId, TaskOutputs};
use crate::types::{RunMode, Severity};

use super::events::MessageFlag;
use super::TaskJobManager;

/// A simulated job in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedJob {
    pub submit_num: u32,
    pub finish_at: DateTime<Utc>,
    pub fail: bool,
}

/// Messages a skip-mode task reports, in order.
///
/// Submitted and started always come first and the terminal output last:
/// failed if configured, succeeded otherwise. Custom outputs are the
/// configured ones, or every custom output if none are configured.
pub fn skip_mode_messages(outputs: &TaskOutputs, configured: &[String]) -> Vec<String> {
    let configured: Vec<&str> = configured.iter().map(|o| normalise_output_label(o)).collect();
    let mut messages = vec![OUTPUT_SUBMITTED.to_string(), OUTPUT_STARTED.to_string()];

    let wanted_custom: Vec<&str> = configured
        .iter()
        .copied()
        .filter(|label| !TaskOutputs::is_standard(label))
        .collect();
    for (label, message) in outputs.custom() {
        if wanted_custom.is_empty() || wanted_custom.contains(&label) {
            messages.push(message.to_string());
        }
    }

    if configured.contains(&OUTPUT_FAILED) {
        messages.push(OUTPUT_FAILED.to_string());
    } else {
        messages.push(OUTPUT_SUCCEEDED.to_string());
    }
    messages
}

impl TaskJobManager {
    pub(crate) fn submit_ghost_job(
        &mut self,
        pool: &mut TaskPool,
        id: &TaskId,
        mode: RunMode,
        rtconfig: &RuntimeConfig,
        now: DateTime<Utc>,
    ) {
        pool.put_insert_task_job(id, now);
        match mode {
            RunMode::Simulation => self.submit_simulation(pool, id, rtconfig, now),
            RunMode::Skip => self.submit_skip(pool, id, rtconfig, now),
            RunMode::Live | RunMode::Dummy => {}
        }
    }

    fn submit_simulation(
        &mut self,
        pool: &mut TaskPool,
        id: &TaskId,
        rtconfig: &RuntimeConfig,
        now: DateTime<Utc>,
    ) {
        let Some(itask) = pool.get_task(id) else {
            return;
        };
        let sim = &rtconfig.simulation;
        let fail = sim.fail_cycle_points.contains(&id.point)
            && (itask.try_num() == 1 || !sim.fail_try_1_only);
        let job = SimulatedJob {
            submit_num: itask.submit_num,
            finish_at: now + TimeDelta::from_std(sim.run_length).unwrap_or(TimeDelta::MAX),
            fail,
        };
        info!(task = %id, finish_at = %job.finish_at, fail, "simulating job");

        for message in [OUTPUT_SUBMITTED, OUTPUT_STARTED] {
            self.process_message(pool, id, Severity::Info, message, Some(now), MessageFlag::Received, now);
        }
        self.simulated.insert(id.clone(), job);
    }

    fn submit_skip(&mut self, pool: &mut TaskPool, id: &TaskId, rtconfig: &RuntimeConfig, now: DateTime<Utc>) {
        let Some(itask) = pool.get_task(id) else {
            return;
        };
        let messages = skip_mode_messages(&itask.state.outputs, &rtconfig.skip_outputs);
        info!(task = %id, outputs = ?messages, "skipping job");
        for message in messages {
            self.process_message(pool, id, Severity::Info, &message, Some(now), MessageFlag::Received, now);
        }
    }

    /// Finish simulated jobs whose run length is up. Returns whether any did.
    pub fn sim_time_check(&mut self, pool: &mut TaskPool, now: DateTime<Utc>) -> bool {
        let due: Vec<(TaskId, SimulatedJob)> = self
            .simulated
            .iter()
            .filter(|(_, job)| job.finish_at <= now)
            .map(|(id, job)| (id.clone(), job.clone()))
            .collect();
        for (id, job) in &due {
            self.simulated.remove(id);
            let Some(itask) = pool.get_task(id) else {
                continue;
            };
            if itask.submit_num != job.submit_num {
                continue;
            }
            let mut messages: Vec<String> = Vec::new();
            if job.fail {
                messages.push(OUTPUT_FAILED.to_string());
            } else {
                messages.extend(itask.state.outputs.custom().map(|(_, m)| m.to_string()));
                messages.push(OUTPUT_SUCCEEDED.to_string());
            }
            for message in messages {
                let severity = if job.fail { Severity::Critical } else { Severity::Info };
                self.process_message(pool, id, severity, &message, Some(now), MessageFlag::Received, now);
            }
        }
        !due.is_empty()
    }

    pub fn simulated_jobs(&self) -> usize {
        self.simulated.len()
    }
}
