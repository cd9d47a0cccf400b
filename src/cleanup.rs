//! Per-container state that must outlive `StartContainer` until removal.
//!
//! Today this is only the log symlink. The table is shared by every request
//! handler, so it is a sharded concurrent map: operations on one key are
//! serialized by its shard lock and never disturb other keys.
//!
//! Single map operations are not enough once filesystem work sits between
//! them, so handlers also take [`CleanupTable::lock`] for the container they
//! touch. Starting and removing the same container then never interleave.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Cleanup bookkeeping for one started container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCleanupInfo {
    /// Absolute path of the symlink created at start.
    pub log_symlink: PathBuf,
}

/// Concurrency-safe map from container ID to its cleanup info.
#[derive(Debug, Default)]
pub struct CleanupTable {
    entries: DashMap<String, ContainerCleanupInfo>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Exclusive hold on one container's cleanup state. The per-key lock is
/// dropped from the table once nobody holds or waits for it.
#[derive(Debug)]
pub struct KeyLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    container_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.container_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl CleanupTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `container_id`'s cleanup state.
    pub async fn lock(&self, container_id: &str) -> KeyLock<'_> {
        let lock = Arc::clone(&self.locks.entry(container_id.to_string()).or_default());
        KeyLock {
            locks: &self.locks,
            container_id: container_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Records cleanup info, replacing any previous entry for the container.
    pub fn insert(&self, container_id: &str, info: ContainerCleanupInfo) {
        self.entries.insert(container_id.to_string(), info);
    }

    /// Returns a copy of the entry for the container, if any.
    pub fn get(&self, container_id: &str) -> Option<ContainerCleanupInfo> {
        self.entries.get(container_id).map(|entry| entry.value().clone())
    }

    /// Removes and returns the entry for the container in one step.
    pub fn remove(&self, container_id: &str) -> Option<ContainerCleanupInfo> {
        self.entries.remove(container_id).map(|(_, info)| info)
    }

    /// Number of tracked containers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no container is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn info(path: &str) -> ContainerCleanupInfo {
        ContainerCleanupInfo {
            log_symlink: PathBuf::from(path),
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let table = CleanupTable::new();
        assert!(table.get("a").is_none());

        table.insert("a", info("/pod/a"));
        assert_eq!(table.get("a"), Some(info("/pod/a")));
        assert_eq!(table.len(), 1);

        assert_eq!(table.remove("a"), Some(info("/pod/a")));
        assert!(table.remove("a").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_insert_replaces_existing_entry() {
        let table = CleanupTable::new();
        table.insert("a", info("/old"));
        table.insert("a", info("/new"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("a"), Some(info("/new")));
    }

    #[test]
    fn test_concurrent_insert_and_remove_of_distinct_keys() {
        let table = Arc::new(CleanupTable::new());
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    let id = format!("container{i}");
                    for _ in 0..100 {
                        table.insert(&id, info(&format!("/pod/{i}")));
                        assert_eq!(table.get(&id), Some(info(&format!("/pod/{i}"))));
                        assert!(table.remove(&id).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_lock_serializes_same_key() {
        let table = Arc::new(CleanupTable::new());
        let held = table.lock("a").await;

        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                let _lock = table.lock("a").await;
                table.insert("a", info("/pod/a"));
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert!(table.is_empty());

        // Other keys are not blocked.
        drop(table.lock("b").await);

        drop(held);
        waiter.await.unwrap();
        assert_eq!(table.get("a"), Some(info("/pod/a")));
        assert!(table.locks.is_empty());
    }

    #[test]
    fn test_same_key_remove_happens_once() {
        let table = Arc::new(CleanupTable::new());
        table.insert("shared", info("/pod/shared"));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || table.remove("shared").is_some())
            })
            .collect();

        let removed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|removed| *removed)
            .count();
        assert_eq!(removed, 1);
    }
}
