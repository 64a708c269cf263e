// src/task/prerequisite.rs

//! A single prerequisite: a set of `(upstream task, output)` conditions that
//! are either all required, or (for a conditional prerequisite) any one.

use std::collections::{BTreeMap, BTreeSet};

use crate::cycling::CyclePoint;

use super::TaskId;

/// An `(upstream task, output label)` pair.
pub type OutputRef = (TaskId, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prerequisite {
    point: CyclePoint,
    conditional: bool,
    entries: BTreeMap<OutputRef, bool>,
}

impl Prerequisite {
    pub fn new(point: CyclePoint, conditional: bool) -> Self {
        Self {
            point,
            conditional,
            entries: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, upstream: TaskId, output: impl Into<String>) {
        self.entries.insert((upstream, output.into()), false);
    }

    pub fn point(&self) -> CyclePoint {
        self.point
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_satisfied(&self) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        if self.conditional {
            self.entries.values().any(|s| *s)
        } else {
            self.entries.values().all(|s| *s)
        }
    }

    /// Mark entries matching any of `outputs`; returns the ones matched.
    pub fn satisfy_me(&mut self, outputs: &BTreeSet<OutputRef>) -> BTreeSet<OutputRef> {
        let mut used = BTreeSet::new();
        for (key, satisfied) in self.entries.iter_mut() {
            if outputs.contains(key) {
                *satisfied = true;
                used.insert(key.clone());
            }
        }
        used
    }

    pub fn set_satisfied(&mut self) {
        for satisfied in self.entries.values_mut() {
            *satisfied = true;
        }
    }

    pub fn set_not_satisfied(&mut self) {
        for satisfied in self.entries.values_mut() {
            *satisfied = false;
        }
    }

    /// Entries already met.
    pub fn satisfied_refs(&self) -> BTreeSet<OutputRef> {
        self.entries
            .iter()
            .filter(|(_, s)| **s)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Cycle points of the upstream tasks this prerequisite refers to.
    pub fn target_points(&self) -> BTreeSet<CyclePoint> {
        self.entries.keys().map(|(id, _)| id.point).collect()
    }

    pub fn upstream_tasks(&self) -> impl Iterator<Item = &TaskId> {
        self.entries.keys().map(|(id, _)| id)
    }

    /// Human-readable condition list, e.g. `("1/foo succeeded", true)`.
    pub fn dump(&self) -> Vec<(String, bool)> {
        self.entries
            .iter()
            .map(|((id, output), satisfied)| (format!("{id} {output}"), *satisfied))
            .collect()
    }
}
