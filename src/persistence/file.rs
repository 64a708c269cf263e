// src/persistence/file.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::fs::FileSystem;

use super::{DbOp, MemoryStore, StateStore, StoreSnapshot};

/// Store that keeps a TOML snapshot of its contents on disk.
///
/// Every applied batch rewrites the whole file.
#[derive(Debug)]
pub struct FileStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    memory: MemoryStore,
}

impl FileStore {
    /// Open a store, loading `path` if it already exists.
    pub fn open(fs: Arc<dyn FileSystem>, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut memory = MemoryStore::new();
        if fs.is_file(&path) {
            let contents = fs.read_to_string(&path)?;
            let snapshot: StoreSnapshot = toml::from_str(&contents)
                .with_context(|| format!("parsing state file {:?}", path))?;
            memory.restore(snapshot)?;
        }
        Ok(Self { fs, path, memory })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_out(&self) -> anyhow::Result<()> {
        let snapshot = self.memory.snapshot()?;
        let contents = toml::to_string(&snapshot)
            .with_context(|| format!("serialising state for {:?}", self.path))?;
        self.fs.write(&self.path, contents.as_bytes())
    }
}

impl StateStore for FileStore {
    fn apply(&mut self, ops: &[DbOp]) -> anyhow::Result<()> {
        let mut next = self.memory.clone();
        next.apply(ops)?;
        let previous = std::mem::replace(&mut self.memory, next);
        if let Err(e) = self.write_out() {
            self.memory = previous;
            return Err(e);
        }
        Ok(())
    }

    fn snapshot(&self) -> anyhow::Result<StoreSnapshot> {
        self.memory.snapshot()
    }

    fn restore(&mut self, snapshot: StoreSnapshot) -> anyhow::Result<()> {
        self.memory.restore(snapshot)?;
        self.write_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycling::CyclePoint;
    use crate::fs::mock::MockFileSystem;
    use crate::persistence::TaskStateRow;
    use crate::task::TaskStatus;
    use chrono::DateTime;

    #[test]
    fn reopening_sees_previous_rows() {
        let fs = Arc::new(MockFileSystem::new());
        let path = PathBuf::from("run/state.toml");

        let mut store = FileStore::open(fs.clone(), &path).unwrap();
        store
            .apply(&[DbOp::InsertTaskState(TaskStateRow {
                cycle: CyclePoint::new(3),
                name: "foo".into(),
                submit_num: 2,
                status: TaskStatus::Retrying,
                is_held: true,
                flow_label: "f".into(),
                time_updated: DateTime::from_timestamp(0, 0).unwrap(),
            })])
            .unwrap();

        let reopened = FileStore::open(fs, &path).unwrap();
        let rows = reopened.snapshot().unwrap().task_pool_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TaskStatus::Retrying);
        assert!(rows[0].is_held);
    }
}
