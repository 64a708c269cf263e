use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;

use cycler::persistence::{DbOp, MemoryStore, StateStore, StoreSnapshot};

/// State store double.
///
/// Records every applied operation and keeps the contents in a shared
/// `MemoryStore`, so a clone handed to a second scheduler sees what the
/// first one wrote (restart tests). Writes can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    memory: Arc<Mutex<MemoryStore>>,
    ops: Arc<Mutex<Vec<DbOp>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `apply` fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every operation applied so far, in order.
    pub fn ops(&self) -> Vec<DbOp> {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn memory(&self) -> MutexGuard<'_, MemoryStore> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for RecordingStore {
    fn apply(&mut self, ops: &[DbOp]) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("store write refused"));
        }
        self.memory().apply(ops)?;
        self.ops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(ops.iter().cloned());
        Ok(())
    }

    fn snapshot(&self) -> anyhow::Result<StoreSnapshot> {
        self.memory().snapshot()
    }

    fn restore(&mut self, snapshot: StoreSnapshot) -> anyhow::Result<()> {
        self.memory().restore(snapshot)
    }
}
