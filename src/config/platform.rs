// src/config/platform.rs

//! Job platforms: where and how jobs are submitted.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use super::duration::parse_delays;
use super::model::PlatformSection;

pub const LOCALHOST: &str = "localhost";

#[derive(Debug, Clone, PartialEq)]
pub struct Platform {
    pub name: String,
    pub hosts: Vec<String>,
    pub owner: Option<String>,
    pub job_runner: String,
    pub install_target: String,
    pub ssh_command: Vec<String>,
    pub submission_retry_delays: Vec<Duration>,
    pub submission_polling_intervals: Vec<Duration>,
    pub execution_polling_intervals: Vec<Duration>,
    pub execution_time_limit_polling_intervals: Vec<Duration>,
}

impl Platform {
    pub fn localhost() -> Self {
        Self {
            name: LOCALHOST.to_string(),
            hosts: vec![LOCALHOST.to_string()],
            owner: None,
            job_runner: "background".to_string(),
            install_target: LOCALHOST.to_string(),
            ssh_command: default_ssh_command(),
            submission_retry_delays: Vec::new(),
            submission_polling_intervals: vec![Duration::from_secs(15 * 60)],
            execution_polling_intervals: vec![Duration::from_secs(15 * 60)],
            execution_time_limit_polling_intervals: vec![
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(420),
            ],
        }
    }

    pub fn from_section(name: &str, section: &PlatformSection) -> Result<Self, String> {
        let base = Platform::localhost();
        let delays = |v: &Option<Vec<String>>, default: Vec<Duration>| {
            v.as_deref()
                .map(parse_delays)
                .transpose()
                .map(|d| d.unwrap_or(default))
                .map_err(|e| format!("platform '{name}': {e}"))
        };
        let hosts = if section.hosts.is_empty() {
            vec![name.to_string()]
        } else {
            section.hosts.clone()
        };
        Ok(Self {
            name: name.to_string(),
            install_target: section.install_target.clone().unwrap_or_else(|| name.to_string()),
            hosts,
            owner: section.owner.clone(),
            job_runner: section
                .job_runner
                .clone()
                .unwrap_or_else(|| base.job_runner.clone()),
            ssh_command: section
                .ssh_command
                .as_deref()
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or(base.ssh_command),
            submission_retry_delays: delays(&section.submission_retry_delays, base.submission_retry_delays)?,
            submission_polling_intervals: delays(
                &section.submission_polling_intervals,
                base.submission_polling_intervals,
            )?,
            execution_polling_intervals: delays(
                &section.execution_polling_intervals,
                base.execution_polling_intervals,
            )?,
            execution_time_limit_polling_intervals: delays(
                &section.execution_time_limit_polling_intervals,
                base.execution_time_limit_polling_intervals,
            )?,
        })
    }

    /// Host that commands for this platform run against.
    pub fn host(&self) -> &str {
        self.hosts.first().map(String::as_str).unwrap_or(LOCALHOST)
    }

    pub fn is_remote(&self) -> bool {
        self.host() != LOCALHOST
    }
}

fn default_ssh_command() -> Vec<String> {
    vec!["ssh".to_string(), "-oBatchMode=yes".to_string()]
}

fn subshell_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(`|\$\()\s*(.*)\s*([`)])$")
            .unwrap_or_else(|e| unreachable!("subshell regex is valid: {e}"))
    })
}

/// If `platform` is a `$(cmd)` or `` `cmd` `` expression, return `cmd`.
pub fn platform_select_command(platform: &str) -> Option<&str> {
    subshell_regex()
        .captures(platform)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_host_select_expressions() {
        assert_eq!(platform_select_command("$(pick-host hpc)"), Some("pick-host hpc"));
        assert_eq!(platform_select_command("`echo hpc`"), Some("echo hpc"));
        assert_eq!(platform_select_command("hpc"), None);
    }

    #[test]
    fn section_defaults_follow_localhost() {
        let section = PlatformSection {
            hosts: vec!["hpc1".into(), "hpc2".into()],
            job_runner: Some("slurm".into()),
            submission_retry_delays: Some(vec!["PT1M".into()]),
            ..Default::default()
        };
        let p = Platform::from_section("hpc", &section).unwrap();
        assert!(p.is_remote());
        assert_eq!(p.host(), "hpc1");
        assert_eq!(p.job_runner, "slurm");
        assert_eq!(p.submission_retry_delays, vec![Duration::from_secs(60)]);
        assert_eq!(p.execution_time_limit_polling_intervals.len(), 3);
        assert!(!Platform::localhost().is_remote());
    }
}
