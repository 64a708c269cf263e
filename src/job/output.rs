// src/job/output.rs

//! Parsing the line protocol printed by job utility commands.
//!
//! Each interesting line starts with a prefix and carries `|`-separated
//! fields, the second of which is a job reference (`point/name/NN`):
//!
//! ```text
//! [TASK JOB SUMMARY]<time>|<job ref>|<fields...>
//! [TASK JOB COMMAND]<time>|<job ref>|<fields...>
//! [TASK JOB MESSAGE]<time>|<job ref>|<event time>|<severity>|<message>
//! ```
//!
//! Jobs named on the command line but missing from its output get a
//! synthesized summary line with return code 1 so that every job receives
//! exactly one outcome.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use crate::subproc::CommandResult;
use crate::task::JobRef;

pub const PREFIX_SUMMARY: &str = "[TASK JOB SUMMARY]";
pub const PREFIX_COMMAND: &str = "[TASK JOB COMMAND]";
pub const PREFIX_MESSAGE: &str = "[TASK JOB MESSAGE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Summary,
    Command,
    Message,
}

/// One parsed output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLine {
    pub kind: LineKind,
    pub time: String,
    pub job: JobRef,
    /// Fields after the job reference.
    pub fields: Vec<String>,
}

impl JobLine {
    /// Parse a prefixed line. Returns `None` for lines without a known
    /// prefix; `Some(Err)` for prefixed lines that are malformed.
    pub fn parse(line: &str) -> Option<Result<Self, String>> {
        let (kind, rest) = [
            (LineKind::Summary, PREFIX_SUMMARY),
            (LineKind::Command, PREFIX_COMMAND),
            (LineKind::Message, PREFIX_MESSAGE),
        ]
        .into_iter()
        .find_map(|(kind, prefix)| line.strip_prefix(prefix).map(|rest| (kind, rest)))?;

        let mut parts = rest.split('|');
        let time = parts.next().unwrap_or_default().to_string();
        let Some(job) = parts.next() else {
            return Some(Err(format!("missing job reference: {line}")));
        };
        let job = match job.trim().parse::<JobRef>() {
            Ok(job) => job,
            Err(e) => return Some(Err(format!("bad job reference in {line}: {e}"))),
        };
        Some(Ok(Self {
            kind,
            time,
            job,
            fields: parts.map(|s| s.trim().to_string()).collect(),
        }))
    }

    pub fn field(&self, i: usize) -> Option<&str> {
        self.fields.get(i).map(String::as_str).filter(|s| !s.is_empty())
    }
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse all prefixed lines of a command's output, then synthesize failure
/// summaries for jobs on the command line that got no summary line.
///
/// Each job of the command gets exactly one summary: repeats, and summaries
/// for jobs the command was not run for, are logged and dropped. Malformed
/// lines are logged and skipped.
pub fn parse_job_lines(result: &CommandResult, now: DateTime<Utc>) -> Vec<JobLine> {
    let mut pending: BTreeSet<&JobRef> = result.ctx.job_refs.iter().collect();
    let mut lines = Vec::new();
    for raw in result.out.lines() {
        match JobLine::parse(raw) {
            None => {}
            Some(Ok(line)) if line.kind == LineKind::Summary && !pending.remove(&line.job) => {
                warn!(command = %result.ctx.kind, job = %line.job, "unhandled output line: {raw}");
            }
            Some(Ok(line)) => lines.push(line),
            Some(Err(e)) => warn!(command = %result.ctx.kind, "unhandled output line: {e}"),
        }
    }

    let missing: Vec<JobRef> = result
        .ctx
        .job_refs
        .iter()
        .filter(|job| pending.contains(job))
        .cloned()
        .collect();
    for job in missing {
        lines.push(JobLine {
            kind: LineKind::Summary,
            time: timestamp(now),
            job,
            fields: vec!["1".to_string()],
        });
    }
    lines
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::cycling::CyclePoint;
    use crate::subproc::{CommandContext, CommandKind};
    use crate::task::TaskId;

    fn job(name: &str, point: i64) -> JobRef {
        JobRef::new(&TaskId::new(name, CyclePoint::new(point)), 1)
    }

    #[test]
    fn parses_prefixed_lines_only() {
        let line = JobLine::parse("[TASK JOB SUMMARY]2026-01-01T00:00:00Z|1/foo/01|0|4242")
            .expect("prefixed")
            .expect("well formed");
        assert_eq!(line.kind, LineKind::Summary);
        assert_eq!(line.job, job("foo", 1));
        assert_eq!(line.field(0), Some("0"));
        assert_eq!(line.field(1), Some("4242"));
        assert_eq!(line.field(2), None);

        assert!(JobLine::parse("some job runner chatter").is_none());
        assert!(matches!(JobLine::parse("[TASK JOB SUMMARY]t|garbage|0"), Some(Err(_))));
    }

    #[test]
    fn missing_jobs_get_failure_lines() {
        let mut ctx = CommandContext::new(CommandKind::JobsSubmit, vec![]);
        ctx.job_refs = vec![job("a", 1), job("b", 1), job("c", 1)];
        let out = "[TASK JOB SUMMARY]t|1/b/01|0|77\n[TASK JOB SUMMARY]t|not a ref\n";
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let lines = parse_job_lines(&CommandResult::new(ctx, 0, out, ""), now);
        let outcomes: Vec<(String, Option<&str>)> = lines
            .iter()
            .map(|l| (l.job.name.clone(), l.field(0)))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("b".to_string(), Some("0")),
                ("a".to_string(), Some("1")),
                ("c".to_string(), Some("1")),
            ]
        );
    }

    #[test]
    fn only_the_first_summary_per_job_counts() {
        let mut ctx = CommandContext::new(CommandKind::JobsSubmit, vec![]);
        ctx.job_refs = vec![job("a", 1)];
        let out = "[TASK JOB SUMMARY]t|1/a/01|0|123\n\
                   [TASK JOB SUMMARY]t|1/a/01|1\n\
                   [TASK JOB SUMMARY]t|1/z/01|0|9\n";
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let lines = parse_job_lines(&CommandResult::new(ctx, 0, out, ""), now);

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].job, job("a", 1));
        assert_eq!(lines[0].field(1), Some("123"));
    }
}
