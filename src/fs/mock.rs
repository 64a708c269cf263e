// src/fs/mock.rs

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use super::FileSystem;

/// In-memory filesystem for tests.
///
/// Clones share contents, so a test can keep one handle while the code under
/// test owns another.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    executable: Arc<Mutex<BTreeSet<PathBuf>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.lock_files()
            .insert(path.as_ref().to_path_buf(), content.into());
    }

    /// Make every subsequent `write` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn is_executable(&self, path: impl AsRef<Path>) -> bool {
        self.executable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path.as_ref())
    }

    /// Paths of every file, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.lock_files().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn lock_files(&self) -> MutexGuard<'_, HashMap<PathBuf, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        match self.lock_files().get(path) {
            Some(content) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("write refused by mock: {:?}", path));
        }
        self.add_file(path, contents);
        Ok(())
    }

    fn is_file(&self, path: &Path) -> bool {
        self.lock_files().contains_key(path)
    }

    fn set_executable(&self, path: &Path) -> Result<()> {
        if !self.is_file(path) {
            return Err(anyhow!("File not found: {:?}", path));
        }
        self.executable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf());
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.lock_files().retain(|p, _| !p.starts_with(path));
        self.executable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|p| !p.starts_with(path));
        Ok(())
    }
}
