// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How jobs are actually run.
///
/// - `Live`: submit real job scripts through the platform's job runner.
/// - `Dummy`: submit real jobs whose script is replaced by a sleep.
/// - `Simulation`: no jobs at all; the scheduler fakes the run in-process.
/// - `Skip`: complete the configured outputs immediately, no job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Live,
    Dummy,
    Simulation,
    Skip,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Live
    }
}

impl RunMode {
    /// Modes that never produce a job submission command.
    pub fn is_ghost(self) -> bool {
        matches!(self, RunMode::Simulation | RunMode::Skip)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Live => "live",
            RunMode::Dummy => "dummy",
            RunMode::Simulation => "simulation",
            RunMode::Skip => "skip",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "live" => Ok(RunMode::Live),
            "dummy" => Ok(RunMode::Dummy),
            "simulation" | "sim" => Ok(RunMode::Simulation),
            "skip" => Ok(RunMode::Skip),
            other => Err(format!(
                "invalid run mode: {other} (expected live, dummy, simulation or skip)"
            )),
        }
    }
}

/// Why (and how urgently) the scheduler is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Every task finished, or the stop point was passed.
    Auto,
    /// Stop once active jobs have finished.
    RequestClean,
    /// Kill active jobs, then stop once they are gone.
    RequestKill,
    /// Stop now, leaving active jobs orphaned.
    RequestNow,
    /// Stop now without any shutdown housekeeping.
    RequestNowNow,
}

impl StopMode {
    pub fn describe(self) -> &'static str {
        match self {
            StopMode::Auto => "workflow completed",
            StopMode::RequestClean => "clean stop requested",
            StopMode::RequestKill => "kill and stop requested",
            StopMode::RequestNow => "immediate stop requested",
            StopMode::RequestNowNow => "immediate stop (no housekeeping) requested",
        }
    }
}

impl FromStr for StopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clean" => Ok(StopMode::RequestClean),
            "kill" => Ok(StopMode::RequestKill),
            "now" => Ok(StopMode::RequestNow),
            "now-now" | "nownow" => Ok(StopMode::RequestNowNow),
            other => Err(format!(
                "invalid stop mode: {other} (expected clean, kill, now or now-now)"
            )),
        }
    }
}

/// Severity attached to a job message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warning,
    Critical,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" => Ok(Severity::Debug),
            "INFO" | "NORMAL" => Ok(Severity::Info),
            "WARNING" | "WARN" => Ok(Severity::Warning),
            "CRITICAL" | "ERROR" => Ok(Severity::Critical),
            other => Err(format!("invalid message severity: {other}")),
        }
    }
}
