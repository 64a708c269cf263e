// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::RunMode;

/// Command-line arguments for `cycler`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cycler",
    version,
    about = "Run a cycling workflow of dependent tasks.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Cycler.toml")]
    pub config: String,

    /// Override the configured run mode (live, dummy, simulation, skip).
    #[arg(long, value_name = "MODE")]
    pub run_mode: Option<RunMode>,

    /// Stop the workflow after this cycle point.
    #[arg(long, value_name = "POINT")]
    pub stop_point: Option<i64>,

    /// Hold every task beyond this cycle point.
    #[arg(long, value_name = "POINT")]
    pub hold_point: Option<i64>,

    /// Start with every task held.
    #[arg(long)]
    pub hold: bool,

    /// Reload the task pool from the state file instead of starting afresh.
    #[arg(long)]
    pub restart: bool,

    /// Shut down (instead of waiting for intervention) if the workflow stalls.
    #[arg(long)]
    pub abort_if_stalled: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CYCLER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the task definitions, but run nothing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_points_and_mode() {
        let args = CliArgs::parse_from([
            "cycler",
            "--config",
            "flow.toml",
            "--run-mode",
            "simulation",
            "--stop-point",
            "5",
            "--hold",
        ]);
        assert_eq!(args.config, "flow.toml");
        assert_eq!(args.run_mode, Some(RunMode::Simulation));
        assert_eq!(args.stop_point, Some(5));
        assert!(args.hold);
        assert!(!args.restart);
    }
}
