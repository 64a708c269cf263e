// src/config/runtime.rs

//! Resolved (parsed) runtime settings for a task.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::cycling::CyclePoint;
use crate::types::RunMode;

use super::duration::{parse_delays, parse_duration};
use super::model::RuntimeSection;

const DEFAULT_SIM_RUN_LENGTH: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub run_length: Duration,
    pub fail_cycle_points: Vec<CyclePoint>,
    pub fail_try_1_only: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            run_length: DEFAULT_SIM_RUN_LENGTH,
            fail_cycle_points: Vec::new(),
            fail_try_1_only: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeConfig {
    pub script: String,
    pub init_script: String,
    pub env_script: String,
    pub pre_script: String,
    pub post_script: String,
    pub err_script: String,
    pub exit_script: String,
    /// Name or `$(cmd)` expression; `None` means localhost.
    pub platform: Option<String>,
    pub run_mode: Option<RunMode>,
    pub execution_retry_delays: Vec<Duration>,
    /// `None` defers to the platform's defaults.
    pub submission_retry_delays: Option<Vec<Duration>>,
    pub execution_time_limit: Option<Duration>,
    pub submission_polling_intervals: Option<Vec<Duration>>,
    pub execution_polling_intervals: Option<Vec<Duration>>,
    pub environment: BTreeMap<String, String>,
    pub directives: BTreeMap<String, String>,
    pub simulation: SimulationConfig,
    pub skip_outputs: Vec<String>,
}

impl RuntimeConfig {
    pub fn from_section(section: &RuntimeSection) -> Result<Self, String> {
        let delays = |v: &Option<Vec<String>>| v.as_deref().map(parse_delays).transpose();

        let mut simulation = SimulationConfig::default();
        if let Some(sim) = &section.simulation {
            if let Some(len) = &sim.run_length {
                simulation.run_length = parse_duration(len)?;
            }
            if let Some(points) = &sim.fail_cycle_points {
                simulation.fail_cycle_points = points.iter().copied().map(CyclePoint::new).collect();
            }
            if let Some(only) = sim.fail_try_1_only {
                simulation.fail_try_1_only = only;
            }
        }

        Ok(Self {
            script: section.script.clone().unwrap_or_default(),
            init_script: section.init_script.clone().unwrap_or_default(),
            env_script: section.env_script.clone().unwrap_or_default(),
            pre_script: section.pre_script.clone().unwrap_or_default(),
            post_script: section.post_script.clone().unwrap_or_default(),
            err_script: section.err_script.clone().unwrap_or_default(),
            exit_script: section.exit_script.clone().unwrap_or_default(),
            platform: section.platform.clone(),
            run_mode: section.run_mode,
            execution_retry_delays: delays(&section.execution_retry_delays)?.unwrap_or_default(),
            submission_retry_delays: delays(&section.submission_retry_delays)?,
            execution_time_limit: section
                .execution_time_limit
                .as_deref()
                .map(parse_duration)
                .transpose()?,
            submission_polling_intervals: delays(&section.submission_polling_intervals)?,
            execution_polling_intervals: delays(&section.execution_polling_intervals)?,
            environment: section.environment.clone(),
            directives: section.directives.clone(),
            simulation,
            skip_outputs: section
                .skip
                .as_ref()
                .and_then(|s| s.outputs.clone())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{SimulationSection, SkipSection};

    #[test]
    fn resolves_delays_and_modes() {
        let section = RuntimeSection {
            script: Some("true".into()),
            execution_retry_delays: Some(vec!["2*PT1S".into()]),
            execution_time_limit: Some("PT1M".into()),
            simulation: Some(SimulationSection {
                fail_cycle_points: Some(vec![2]),
                ..Default::default()
            }),
            skip: Some(SkipSection {
                outputs: Some(vec!["failed".into()]),
            }),
            ..Default::default()
        };
        let rt = RuntimeConfig::from_section(&section).unwrap();
        assert_eq!(rt.execution_retry_delays.len(), 2);
        assert_eq!(rt.execution_time_limit, Some(Duration::from_secs(60)));
        assert_eq!(rt.submission_retry_delays, None);
        assert_eq!(rt.simulation.fail_cycle_points, vec![CyclePoint::new(2)]);
        assert!(rt.simulation.fail_try_1_only);
        assert_eq!(rt.skip_outputs, vec!["failed".to_string()]);
    }

    #[test]
    fn bad_duration_is_an_error() {
        let section = RuntimeSection {
            execution_time_limit: Some("forever".into()),
            ..Default::default()
        };
        assert!(RuntimeConfig::from_section(&section).is_err());
    }
}
