// src/persistence/memory.rs

use std::collections::BTreeMap;

use crate::cycling::CyclePoint;

use super::{
    DbOp, StateStore, StoreSnapshot, TaskJobRow, TaskOutputsRow, TaskStateRow, TaskTimerRow,
};

type TaskKey = (CyclePoint, String);

/// In-process store; also the working copy behind [`super::FileStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    task_states: BTreeMap<TaskKey, TaskStateRow>,
    task_pool: BTreeMap<TaskKey, TaskStateRow>,
    task_jobs: BTreeMap<(CyclePoint, String, u32), TaskJobRow>,
    task_outputs: BTreeMap<TaskKey, TaskOutputsRow>,
    task_timers: BTreeMap<(CyclePoint, String, String), TaskTimerRow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_one(&mut self, op: &DbOp) {
        match op {
            DbOp::InsertTaskState(row) | DbOp::UpdateTaskState(row) => {
                let key = (row.cycle, row.name.clone());
                self.task_states.insert(key.clone(), row.clone());
                self.task_pool.insert(key, row.clone());
            }
            DbOp::RemoveFromPool { cycle, name } => {
                let key = (*cycle, name.clone());
                self.task_pool.remove(&key);
                self.task_timers.retain(|(c, n, _), _| !(c == cycle && n == name));
            }
            DbOp::InsertTaskJob(row) => {
                self.task_jobs
                    .insert((row.cycle, row.name.clone(), row.submit_num), row.clone());
            }
            DbOp::UpdateTaskJob(update) => {
                let key = (update.cycle, update.name.clone(), update.submit_num);
                if let Some(row) = self.task_jobs.get_mut(&key) {
                    macro_rules! set {
                        ($($field:ident),*) => {
                            $(if update.$field.is_some() {
                                row.$field = update.$field.clone();
                            })*
                        };
                    }
                    set!(
                        job_id,
                        submit_status,
                        run_status,
                        run_signal,
                        time_submit_exit,
                        time_run,
                        time_run_exit
                    );
                }
            }
            DbOp::UpdateTaskOutputs(row) => {
                self.task_outputs
                    .insert((row.cycle, row.name.clone()), row.clone());
            }
            DbOp::PutTaskTimer(row) => {
                self.task_timers.insert(
                    (row.cycle, row.name.clone(), row.ctx_key.clone()),
                    row.clone(),
                );
            }
        }
    }

    pub fn job(&self, cycle: CyclePoint, name: &str, submit_num: u32) -> Option<&TaskJobRow> {
        self.task_jobs.get(&(cycle, name.to_string(), submit_num))
    }
}

impl StateStore for MemoryStore {
    fn apply(&mut self, ops: &[DbOp]) -> anyhow::Result<()> {
        for op in ops {
            self.apply_one(op);
        }
        Ok(())
    }

    fn snapshot(&self) -> anyhow::Result<StoreSnapshot> {
        Ok(StoreSnapshot {
            task_states: self.task_states.values().cloned().collect(),
            task_pool: self.task_pool.values().cloned().collect(),
            task_jobs: self.task_jobs.values().cloned().collect(),
            task_outputs: self.task_outputs.values().cloned().collect(),
            task_timers: self.task_timers.values().cloned().collect(),
        })
    }

    fn restore(&mut self, snapshot: StoreSnapshot) -> anyhow::Result<()> {
        *self = MemoryStore::default();
        for row in snapshot.task_states {
            self.task_states.insert((row.cycle, row.name.clone()), row);
        }
        for row in snapshot.task_pool {
            self.task_pool.insert((row.cycle, row.name.clone()), row);
        }
        for row in snapshot.task_jobs {
            self.task_jobs
                .insert((row.cycle, row.name.clone(), row.submit_num), row);
        }
        for row in snapshot.task_outputs {
            self.task_outputs.insert((row.cycle, row.name.clone()), row);
        }
        for row in snapshot.task_timers {
            self.task_timers
                .insert((row.cycle, row.name.clone(), row.ctx_key.clone()), row);
        }
        Ok(())
    }
}
