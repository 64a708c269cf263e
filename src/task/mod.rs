// src/task/mod.rs

//! Task definitions, task instances and their state.
//!
//! - [`definition`]: the static, config-derived description of a task.
//! - [`proxy`]: one instance of a task at a cycle point.
//! - [`state`]: the status machine plus held flag, prerequisites, outputs.
//! - [`outputs`] / [`prerequisite`]: the two halves of dependency matching.
//! - [`timer`]: retry and poll delay timers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cycling::CyclePoint;

pub mod definition;
pub mod outputs;
pub mod prerequisite;
pub mod proxy;
pub mod state;
pub mod timer;

pub use definition::{TaskDefinition, TriggerGroup, TriggerRef};
pub use outputs::TaskOutputs;
pub use prerequisite::Prerequisite;
pub use proxy::{RetryPhase, TaskProxy, TaskSummary};
pub use state::{TaskState, TaskStatus};
pub use timer::TaskActionTimer;

/// Identity of a task instance: `(name, point)`, shown as `point/name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub name: String,
    pub point: CyclePoint,
}

impl TaskId {
    pub fn new(name: impl Into<String>, point: CyclePoint) -> Self {
        Self {
            name: name.into(),
            point,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.point, self.name)
    }
}

impl FromStr for TaskId {
    type Err = String;

    /// Accepts `point/name` and the older `name.point`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((point, name)) = s.split_once('/') {
            return Ok(TaskId::new(name, point.parse()?));
        }
        if let Some((name, point)) = s.rsplit_once('.') {
            return Ok(TaskId::new(name, point.parse()?));
        }
        Err(format!("invalid task id '{s}' (expected POINT/NAME)"))
    }
}

/// One job of a task instance: `point/name/NN`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobRef {
    pub point: CyclePoint,
    pub name: String,
    pub submit_num: u32,
}

impl JobRef {
    pub fn new(id: &TaskId, submit_num: u32) -> Self {
        Self {
            point: id.point,
            name: id.name.clone(),
            submit_num,
        }
    }

    pub fn task_id(&self) -> TaskId {
        TaskId::new(self.name.clone(), self.point)
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{:02}", self.point, self.name, self.submit_num)
    }
}

impl FromStr for JobRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(point), Some(name), Some(num)) if !name.is_empty() => Ok(JobRef {
                point: point.parse()?,
                name: name.to_string(),
                submit_num: num
                    .parse()
                    .map_err(|e| format!("invalid submit number in '{s}': {e}"))?,
            }),
            _ => Err(format!("invalid job reference '{s}' (expected POINT/NAME/NN)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_formats_and_parses_both_forms() {
        let id = TaskId::new("foo", CyclePoint::new(3));
        assert_eq!(id.to_string(), "3/foo");
        assert_eq!("3/foo".parse::<TaskId>(), Ok(id.clone()));
        assert_eq!("foo.3".parse::<TaskId>(), Ok(id));
        assert!("foo".parse::<TaskId>().is_err());
    }

    #[test]
    fn job_ref_pads_submit_number() {
        let job = JobRef::new(&TaskId::new("bar", CyclePoint::new(12)), 3);
        assert_eq!(job.to_string(), "12/bar/03");
        assert_eq!("12/bar/03".parse::<JobRef>(), Ok(job));
        assert!("12/bar".parse::<JobRef>().is_err());
    }
}
