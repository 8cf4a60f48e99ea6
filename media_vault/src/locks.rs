//! Per-entry exclusivity

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per entry path. Handles are dropped from the table once
/// nobody holds them.
#[derive(Debug, Default)]
pub struct EntryLocks {
    table: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

pub type EntryGuard = OwnedMutexGuard<()>;

impl EntryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock();
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        table
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `path`.
    pub async fn lock(&self, path: &Path) -> EntryGuard {
        self.handle(path).lock_owned().await
    }

    /// Blocking variant for use on worker threads.
    pub fn blocking_lock(&self, path: &Path) -> EntryGuard {
        self.handle(path).blocking_lock_owned()
    }

    /// Entries currently tracked
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
