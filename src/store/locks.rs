use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::RowKey;

type LockKey = (&'static str, RowKey);

/// Per-key async mutexes for write serialization.
///
/// Writers of the same `(table, scope, name)` queue behind each other; writers of
/// different keys never contend. An entry lives only while someone holds or waits
/// on it.
#[derive(Clone, Default)]
pub struct KeyLocks {
    inner: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one key.
    ///
    /// A waiter dropped before it acquires still releases its claim on the entry.
    pub async fn lock(&self, table: &'static str, key: &RowKey) -> KeyGuard {
        let lock_key = (table, key.clone());
        let mutex = self.inner.entry(lock_key.clone()).or_default().clone();
        let claim = Claim {
            key: lock_key,
            locks: self.inner.clone(),
            mutex,
        };
        let guard = claim.acquire().await;
        KeyGuard {
            guard: Some(guard),
            _claim: claim,
        }
    }

    /// Number of keys currently held or awaited
    pub fn active(&self) -> usize {
        self.inner.len()
    }
}

/// Interest in one entry, held from the first wait until release
struct Claim {
    key: LockKey,
    locks: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
    mutex: Arc<Mutex<()>>,
}

impl Claim {
    async fn acquire(&self) -> OwnedMutexGuard<()> {
        self.mutex.clone().lock_owned().await
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        // Idle when only the map and this claim still point at the mutex
        self.locks.remove_if(&self.key, |_, mutex| {
            Arc::ptr_eq(mutex, &self.mutex) && Arc::strong_count(mutex) == 2
        });
    }
}

/// Exclusive access to one key; released on drop
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    _claim: Claim,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Unlock before the claim's cleanup runs
        self.guard.take();
    }
}
