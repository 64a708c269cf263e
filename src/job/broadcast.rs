// src/job/broadcast.rs

//! Runtime overrides set by operators while the workflow runs.

use std::collections::BTreeMap;

use tracing::info;

use crate::config::model::RuntimeSection;
use crate::config::runtime::RuntimeConfig;
use crate::cycling::CyclePoint;
use crate::task::TaskDefinition;

/// Broadcast settings keyed by target point (`None` = every point) and
/// namespace.
#[derive(Debug, Clone, Default)]
pub struct BroadcastManager {
    broadcasts: BTreeMap<(Option<CyclePoint>, String), RuntimeSection>,
}

impl BroadcastManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.broadcasts.is_empty()
    }

    /// Add settings; later broadcasts to the same target win field by field.
    pub fn put_broadcast(
        &mut self,
        point: Option<CyclePoint>,
        namespace: &str,
        settings: &RuntimeSection,
    ) {
        info!(
            point = %point.map(|p| p.to_string()).unwrap_or_else(|| "*".into()),
            %namespace,
            "broadcast set"
        );
        self.broadcasts
            .entry((point, namespace.to_string()))
            .or_default()
            .merge_from(settings);
    }

    /// Drop broadcasts matching the given point and namespace (`None`
    /// matches anything). Returns how many were dropped.
    pub fn clear_broadcast(&mut self, point: Option<CyclePoint>, namespace: Option<&str>) -> usize {
        let before = self.broadcasts.len();
        self.broadcasts.retain(|(p, ns), _| {
            let point_hit = point.is_none() || *p == point;
            let ns_hit = namespace.map(|n| n == ns).unwrap_or(true);
            !(point_hit && ns_hit)
        });
        let cleared = before - self.broadcasts.len();
        if cleared > 0 {
            info!(cleared, "broadcasts cleared");
        }
        cleared
    }

    /// Drop point-specific broadcasts older than `point`.
    pub fn expire_broadcast(&mut self, point: CyclePoint) -> usize {
        let before = self.broadcasts.len();
        self.broadcasts
            .retain(|(p, _), _| p.map(|p| p >= point).unwrap_or(true));
        before - self.broadcasts.len()
    }

    /// The task's runtime section with broadcasts applied: most general
    /// namespace first, and within a namespace all-point settings before
    /// point-specific ones.
    pub fn get_runtime(&self, tdef: &TaskDefinition, point: CyclePoint) -> RuntimeSection {
        let mut runtime = tdef.runtime.clone();
        for namespace in tdef.namespace_hierarchy.iter().rev() {
            for key in [(None, namespace.clone()), (Some(point), namespace.clone())] {
                if let Some(settings) = self.broadcasts.get(&key) {
                    runtime.merge_from(settings);
                }
            }
        }
        runtime
    }

    /// Parsed runtime for a job submission.
    pub fn get_rtconfig(&self, tdef: &TaskDefinition, point: CyclePoint) -> Result<RuntimeConfig, String> {
        let applies = self.broadcasts.keys().any(|(p, ns)| {
            p.map(|p| p == point).unwrap_or(true) && tdef.in_namespace(ns)
        });
        if !applies {
            return Ok(tdef.rtconfig.clone());
        }
        RuntimeConfig::from_section(&self.get_runtime(tdef, point))
    }
}
