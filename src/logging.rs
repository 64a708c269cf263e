// src/logging.rs

//! Logging setup for `cycler` using `tracing` + `tracing-subscriber`.
//!
//! The filter comes from, in order:
//! 1. `--log-level` on the command line, applied to every target
//! 2. `CYCLER_LOG`, in `EnvFilter` syntax (e.g. `info,cycler::pool=debug`)
//! 3. `info`
//!
//! Logs go to STDERR; the dry-run listing uses stdout.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

const LOG_ENV: &str = "CYCLER_LOG";

/// Initialise the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    fmt()
        .with_env_filter(build_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref())?)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("installing the tracing subscriber")
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = cli_level {
        return Ok(EnvFilter::new(level.as_str()));
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid {LOG_ENV} value '{directives}'")),
        None => Ok(EnvFilter::new("info")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_level_wins_over_the_environment() {
        let filter = build_filter(Some(LogLevel::Debug), Some("warn")).unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn environment_directives_are_kept() {
        let filter = build_filter(None, Some("info,cycler::pool=trace")).unwrap();
        assert!(filter.to_string().contains("cycler::pool=trace"));
    }

    #[test]
    fn blank_environment_means_info() {
        let filter = build_filter(None, Some("  ")).unwrap();
        assert_eq!(filter.to_string(), "info");
    }
}
