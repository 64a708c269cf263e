// src/pool/runahead.rs

//! Runahead limiting: how far ahead of the oldest unfinished cycle point
//! instances may be released into the main pool.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::workflow::RunaheadLimit;
use crate::cycling::CyclePoint;
use crate::task::{TaskId, TaskStatus};

use super::TaskPool;

impl TaskPool {
    /// Release runahead instances at or below the runahead limit point.
    /// Returns whether anything was released.
    pub fn release_runahead_tasks(&mut self, now: DateTime<Utc>) -> bool {
        if self.runahead_pool.is_empty() {
            return false;
        }

        // Restart loads everything into the runahead pool; instances already
        // past waiting go straight through.
        let settled: Vec<TaskId> = self
            .runahead_pool
            .values()
            .flat_map(|m| m.values())
            .filter(|t| t.state.status != TaskStatus::Waiting)
            .map(|t| t.identity.clone())
            .collect();
        for id in &settled {
            self.release_runahead_task(id, now);
        }

        let Some(limit_point) = self.compute_runahead() else {
            return !settled.is_empty();
        };

        // Only instances present now; ones auto-spawned below wait a round.
        let candidates: Vec<TaskId> = self
            .runahead_pool
            .range(..=limit_point)
            .flat_map(|(_, m)| m.keys().cloned())
            .collect();
        for id in &candidates {
            self.release_runahead_task(id, now);
        }
        !settled.is_empty() || !candidates.is_empty()
    }

    /// The runahead limit point, or `None` if nothing can be released.
    pub fn compute_runahead(&mut self) -> Option<CyclePoint> {
        let points = self.active_points();
        let base = *points.first()?;

        let mut limit_point = match self.config.runahead_limit {
            RunaheadLimit::Count(count) => {
                let reachable = match &self.runahead_cache {
                    Some((cached_base, reachable)) if *cached_base == base => reachable.clone(),
                    _ => {
                        let reachable = self.sequence_points(base, count);
                        self.runahead_cache = Some((base, reachable.clone()));
                        reachable
                    }
                };
                let all: BTreeSet<CyclePoint> = points.iter().copied().chain(reachable).collect();
                // `count` active points, the oldest being the base.
                let nth = *all.iter().take(count.max(1)).last()?;
                match self.max_future_offset {
                    Some(offset) => nth + offset,
                    None => nth,
                }
            }
            // Interval limits are checked against future offsets at load.
            RunaheadLimit::Interval(interval) => base + interval,
        };

        for cap in [self.stop_point, self.config.final_point].into_iter().flatten() {
            if limit_point > cap {
                limit_point = cap;
            }
        }
        debug!(%base, %limit_point, "runahead limit");
        Some(limit_point)
    }

    /// Points counted towards the runahead limit, ascending.
    ///
    /// At start-up, or once everything in the main pool has finished, these
    /// are the points holding waiting runahead instances. Otherwise leading
    /// main pool points with nothing in progress are skipped and every later
    /// point counts.
    fn active_points(&self) -> Vec<CyclePoint> {
        let settled = self
            .main_pool
            .values()
            .flat_map(|m| m.values())
            .all(|t| t.state.status.is_finished());
        if settled {
            return self
                .runahead_pool
                .iter()
                .filter(|(_, m)| m.values().any(|t| t.state.status == TaskStatus::Waiting))
                .map(|(p, _)| *p)
                .collect();
        }
        self.main_pool
            .iter()
            .skip_while(|(_, m)| {
                m.values().all(|t| {
                    t.state.status == TaskStatus::Waiting || t.state.status.is_finished()
                })
            })
            .map(|(p, _)| *p)
            .collect()
    }

    /// Up to `count` points after `base` on each workflow sequence.
    fn sequence_points(&self, base: CyclePoint, count: usize) -> BTreeSet<CyclePoint> {
        let mut reachable = BTreeSet::new();
        for sequence in &self.config.sequences {
            let mut point = sequence.next_point(base);
            let mut n = 0;
            while let Some(p) = point {
                if n >= count {
                    break;
                }
                reachable.insert(p);
                n += 1;
                point = sequence.next_point(p);
            }
        }
        reachable
    }

    /// Move one instance from the runahead pool into the main pool and its
    /// queue, then auto-spawn its next instance if that has no parents.
    pub fn release_runahead_task(&mut self, id: &TaskId, now: DateTime<Utc>) -> bool {
        let Some(mut itask) = Self::take_from(&mut self.runahead_pool, id) else {
            return false;
        };
        itask.state.is_updated = true;
        let queue = self.queue_name_for(&itask);
        let has_future_triggers = itask.tdef.max_future_prereq_offset().is_some();
        let tdef = itask.tdef.clone();
        info!(task = %id, %queue, "released from runahead");
        Self::insert_into(&mut self.main_pool, itask);
        self.queues.entry(queue).or_default().push_back(id.clone());
        if has_future_triggers {
            self.set_max_future_offset();
        }

        if let Some(next) = tdef.next_point(id.point) {
            let next_id = TaskId::new(tdef.name.clone(), next);
            if !self.config.has_parents(&tdef, next) && self.get_task(&next_id).is_none() {
                self.spawn(Some(id), &tdef.name, next, None, false, now);
            }
        }
        true
    }
}
