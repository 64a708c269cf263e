// src/task/definition.rs

//! Static task definitions built from the validated config.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::model::RuntimeSection;
use crate::config::runtime::RuntimeConfig;
use crate::cycling::{next_point_on_any, CyclePoint, Interval, SequenceRef};

use super::outputs::{normalise_output_label, OUTPUT_SUCCEEDED};

/// One trigger: `name[offset]:output`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRef {
    pub task: String,
    /// Upstream point = own point + offset.
    pub offset: Interval,
    pub output: String,
}

fn trigger_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>[\w\-+%@]+)(?:\[(?P<offset>[^\]]*)\])?(?::(?P<output>[\w\-]+))?$")
            .unwrap_or_else(|e| unreachable!("trigger regex is valid: {e}"))
    })
}

impl TriggerRef {
    pub fn parse(s: &str) -> Result<Self, String> {
        let caps = trigger_regex()
            .captures(s.trim())
            .ok_or_else(|| format!("invalid trigger '{s}' (expected name[offset]:output)"))?;
        let offset = match caps.name("offset").map(|m| m.as_str().trim()) {
            Some(o) if !o.is_empty() => o.parse::<Interval>()?,
            _ => Interval::ZERO,
        };
        let output = caps
            .name("output")
            .map(|m| normalise_output_label(m.as_str()).to_string())
            .unwrap_or_else(|| OUTPUT_SUCCEEDED.to_string());
        Ok(Self {
            task: caps["name"].to_string(),
            offset,
            output,
        })
    }

    pub fn target_point(&self, point: CyclePoint) -> CyclePoint {
        point + self.offset
    }
}

impl fmt::Display for TriggerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.offset == Interval::ZERO {
            write!(f, "{}:{}", self.task, self.output)
        } else {
            write!(f, "{}[{}]:{}", self.task, self.offset, self.output)
        }
    }
}

/// Triggers forming a single prerequisite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerGroup {
    /// Any one trigger suffices when set; otherwise all are needed.
    pub conditional: bool,
    pub triggers: Vec<TriggerRef>,
}

#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    /// Config generation this definition was built for.
    pub generation: u64,
    /// Own name first, then each ancestor family, ending with `root`.
    pub namespace_hierarchy: Vec<String>,
    pub sequences: Vec<SequenceRef>,
    pub triggers: Vec<TriggerGroup>,
    pub suicide_triggers: Vec<TriggerGroup>,
    /// Custom outputs: label -> message.
    pub outputs: BTreeMap<String, String>,
    pub xtriggers: Vec<String>,
    pub clock_offset: Option<Interval>,
    pub expire_offset: Option<Interval>,
    pub queue: String,
    /// Merged runtime sections, kept raw so broadcasts can overlay them.
    pub runtime: RuntimeSection,
    pub rtconfig: RuntimeConfig,
}

impl TaskDefinition {
    pub fn next_point(&self, point: CyclePoint) -> Option<CyclePoint> {
        next_point_on_any(&self.sequences, point)
    }

    pub fn first_point(&self, point: CyclePoint) -> Option<CyclePoint> {
        self.sequences.iter().filter_map(|s| s.first_point(point)).min()
    }

    pub fn is_on_sequence(&self, point: CyclePoint) -> bool {
        self.sequences.iter().any(|s| s.is_on_sequence(point))
    }

    /// Largest positive trigger offset, i.e. how far ahead of its own point
    /// this task may need upstream instances.
    pub fn max_future_prereq_offset(&self) -> Option<Interval> {
        self.triggers
            .iter()
            .flat_map(|g| g.triggers.iter())
            .map(|t| t.offset)
            .filter(|o| o.is_positive())
            .max()
    }

    /// Every trigger, normal and suicide.
    pub fn all_triggers(&self) -> impl Iterator<Item = &TriggerRef> {
        self.triggers
            .iter()
            .chain(self.suicide_triggers.iter())
            .flat_map(|g| g.triggers.iter())
    }

    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.namespace_hierarchy.iter().any(|n| n == namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trigger_forms() {
        let t = TriggerRef::parse("foo").unwrap();
        assert_eq!((t.task.as_str(), t.offset, t.output.as_str()), ("foo", Interval::ZERO, "succeeded"));

        let t = TriggerRef::parse("foo[-P1]:fail").unwrap();
        assert_eq!(t.offset, Interval::new(-1));
        assert_eq!(t.output, "failed");
        assert_eq!(t.target_point(CyclePoint::new(4)), CyclePoint::new(3));
        assert_eq!(t.to_string(), "foo[-P1]:failed");

        let t = TriggerRef::parse("bar[+P2]:x").unwrap();
        assert_eq!(t.offset, Interval::new(2));
        assert_eq!(t.output, "x");

        assert!(TriggerRef::parse("foo[").is_err());
        assert!(TriggerRef::parse("a b").is_err());
    }
}
