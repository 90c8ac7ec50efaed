use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async locks keyed by id, one per room or user.
///
/// A key's lock exists only while someone holds or awaits it, so keys that are never
/// used again don't accumulate.
#[derive(Debug, Default)]
pub struct LockMap {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Holds a key of a [LockMap], releasing it when dropped
pub struct KeyGuard<'a> {
    key: String,
    map: &'a LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no one else holds the key.
    pub async fn acquire(&self, key: &str) -> KeyGuard<'_> {
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;

        KeyGuard {
            key: key.to_string(),
            map: self,
            guard: Some(guard),
        }
    }

    /// Returns how many keys are held or awaited
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Every waiter holds its own clone of the lock
        self.map
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
