#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use cycler::config::WorkflowConfig;
use cycler::cycling::CyclePoint;
use cycler::fs::mock::MockFileSystem;
use cycler::job::TaskJobManager;
use cycler::persistence::WorkflowDbManager;
use cycler::pool::TaskPool;
use cycler::scheduler::{SchedulerCore, SchedulerOptions};
use cycler::task::{TaskId, TaskStatus};
use cycler::triggers::ClockOracle;

use crate::recording_store::RecordingStore;

/// Fixed start time for deterministic tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// `t0()` plus `secs` seconds.
pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + TimeDelta::seconds(secs)
}

pub fn id(name: &str, point: i64) -> TaskId {
    TaskId::new(name, CyclePoint::new(point))
}

pub fn db_for(store: &RecordingStore) -> WorkflowDbManager {
    WorkflowDbManager::new(Box::new(store.clone()), None, 0, Duration::ZERO)
}

/// Pool over an in-memory store.
pub fn pool_for(config: WorkflowConfig) -> TaskPool {
    TaskPool::new(Arc::new(config), WorkflowDbManager::in_memory())
}

pub fn pool_with_store(config: WorkflowConfig, store: &RecordingStore) -> TaskPool {
    TaskPool::new(Arc::new(config), db_for(store))
}

pub fn job_manager(config: &WorkflowConfig, fs: &MockFileSystem) -> TaskJobManager {
    TaskJobManager::new(config, Arc::new(fs.clone()))
}

/// Scheduler core over a mock filesystem and a recording store, not yet
/// started.
pub fn core_for(
    config: WorkflowConfig,
    fs: &MockFileSystem,
    store: &RecordingStore,
    options: SchedulerOptions,
) -> SchedulerCore {
    let jobs = job_manager(&config, fs);
    let oracle = ClockOracle::new(config.clock);
    let pool = pool_with_store(config, store);
    SchedulerCore::new(pool, jobs, Box::new(oracle), options)
}

pub fn status_of(pool: &TaskPool, name: &str, point: i64) -> Option<TaskStatus> {
    pool.get_task(&id(name, point)).map(|t| t.state.status)
}

/// Ids of every instance, main and runahead, as `point/name` strings.
pub fn all_ids(pool: &TaskPool) -> Vec<String> {
    let mut ids: Vec<String> = pool.get_all_tasks().map(|t| t.identity.to_string()).collect();
    ids.sort();
    ids
}
