#![allow(dead_code)]

use cycler::config::{
    PlatformSection, QueueSection, RawWorkflowConfig, RuntimeSection, SequenceSection,
    SimulationSection, SkipSection, TaskSection, WorkflowConfig,
};
use cycler::types::RunMode;

/// Builder for `WorkflowConfig` to simplify test setup.
///
/// Starts at initial point 1 with no final point, a mock-friendly run
/// directory and a zero tick.
pub struct WorkflowConfigBuilder {
    config: RawWorkflowConfig,
}

impl WorkflowConfigBuilder {
    pub fn new() -> Self {
        let mut config = RawWorkflowConfig::default();
        config.scheduler.workflow_name = Some("test".to_string());
        config.scheduler.run_dir = Some("/cycler-test/run".to_string());
        config.scheduler.tick = Some("10ms".to_string());
        config.scheduling.initial_point = Some(1);
        Self { config }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfigBuilder) -> Self {
        let (section, runtime) = task.build();
        self.config.task.insert(name.to_string(), section);
        if let Some(runtime) = runtime {
            self.config.runtime.insert(name.to_string(), runtime);
        }
        self
    }

    /// A runtime namespace (family) tasks can inherit from.
    pub fn with_family(mut self, name: &str, runtime: RuntimeSection) -> Self {
        self.config.runtime.insert(name.to_string(), runtime);
        self
    }

    pub fn with_queue(mut self, name: &str, limit: usize, members: &[&str]) -> Self {
        self.config.queues.insert(
            name.to_string(),
            QueueSection {
                limit,
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
        self
    }

    pub fn with_sequence(mut self, name: &str, start: Option<i64>, step: i64, end: Option<i64>) -> Self {
        self.config
            .scheduling
            .sequences
            .insert(name.to_string(), SequenceSection { start, step, end });
        self
    }

    pub fn with_platform(mut self, name: &str, platform: PlatformSection) -> Self {
        self.config.platforms.insert(name.to_string(), platform);
        self
    }

    pub fn initial_point(mut self, point: i64) -> Self {
        self.config.scheduling.initial_point = Some(point);
        self
    }

    pub fn final_point(mut self, point: i64) -> Self {
        self.config.scheduling.final_point = Some(point);
        self
    }

    pub fn stop_point(mut self, point: i64) -> Self {
        self.config.scheduling.stop_point = Some(point);
        self
    }

    pub fn hold_point(mut self, point: i64) -> Self {
        self.config.scheduling.hold_point = Some(point);
        self
    }

    pub fn max_active_cycle_points(mut self, n: usize) -> Self {
        self.config.scheduling.max_active_cycle_points = Some(n);
        self
    }

    pub fn runahead_limit(mut self, limit: &str) -> Self {
        self.config.scheduling.runahead_limit = Some(limit.to_string());
        self
    }

    pub fn default_queue_limit(mut self, limit: usize) -> Self {
        self.config.scheduling.default_queue_limit = Some(limit);
        self
    }

    pub fn run_mode(mut self, mode: RunMode) -> Self {
        self.config.scheduling.run_mode = Some(mode);
        self
    }

    pub fn clock(mut self, origin: &str, cycle: &str) -> Self {
        self.config.scheduling.clock_origin = Some(origin.to_string());
        self.config.scheduling.clock_cycle = Some(cycle.to_string());
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.scheduler.batch_size = Some(n);
        self
    }

    pub fn raw(self) -> RawWorkflowConfig {
        self.config
    }

    pub fn build(self) -> WorkflowConfig {
        WorkflowConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for WorkflowConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one task: its graph section plus its own runtime section.
#[derive(Default)]
pub struct TaskConfigBuilder {
    task: TaskSection,
    runtime: Option<RuntimeSection>,
}

impl TaskConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn runtime(&mut self) -> &mut RuntimeSection {
        self.runtime.get_or_insert_with(RuntimeSection::default)
    }

    pub fn after(mut self, trigger: &str) -> Self {
        self.task.after.push(trigger.to_string());
        self
    }

    pub fn after_any(mut self, triggers: &[&str]) -> Self {
        self.task
            .after_any
            .push(triggers.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn suicide(mut self, trigger: &str) -> Self {
        self.task.suicide.push(trigger.to_string());
        self
    }

    pub fn output(mut self, label: &str, message: &str) -> Self {
        self.task.outputs.insert(label.to_string(), message.to_string());
        self
    }

    pub fn sequence(mut self, name: &str) -> Self {
        self.task.sequences.push(name.to_string());
        self
    }

    pub fn xtrigger(mut self, label: &str) -> Self {
        self.task.xtriggers.push(label.to_string());
        self
    }

    pub fn clock_offset(mut self, offset: &str) -> Self {
        self.task.clock_offset = Some(offset.to_string());
        self
    }

    pub fn expire_offset(mut self, offset: &str) -> Self {
        self.task.expire_offset = Some(offset.to_string());
        self
    }

    pub fn inherit(mut self, family: &str) -> Self {
        self.runtime().inherit = Some(family.to_string());
        self
    }

    pub fn script(mut self, script: &str) -> Self {
        self.runtime().script = Some(script.to_string());
        self
    }

    pub fn platform(mut self, platform: &str) -> Self {
        self.runtime().platform = Some(platform.to_string());
        self
    }

    pub fn run_mode(mut self, mode: RunMode) -> Self {
        self.runtime().run_mode = Some(mode);
        self
    }

    pub fn execution_retry_delays(mut self, delays: &[&str]) -> Self {
        self.runtime().execution_retry_delays =
            Some(delays.iter().map(|d| d.to_string()).collect());
        self
    }

    pub fn submission_retry_delays(mut self, delays: &[&str]) -> Self {
        self.runtime().submission_retry_delays =
            Some(delays.iter().map(|d| d.to_string()).collect());
        self
    }

    pub fn execution_time_limit(mut self, limit: &str) -> Self {
        self.runtime().execution_time_limit = Some(limit.to_string());
        self
    }

    pub fn simulation(mut self, run_length: &str, fail_points: &[i64]) -> Self {
        self.runtime().simulation = Some(SimulationSection {
            run_length: Some(run_length.to_string()),
            fail_cycle_points: (!fail_points.is_empty()).then(|| fail_points.to_vec()),
            fail_try_1_only: None,
        });
        self
    }

    pub fn skip_outputs(mut self, outputs: &[&str]) -> Self {
        self.runtime().skip = Some(SkipSection {
            outputs: Some(outputs.iter().map(|o| o.to_string()).collect()),
        });
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.runtime()
            .environment
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> (TaskSection, Option<RuntimeSection>) {
        (self.task, self.runtime)
    }
}
