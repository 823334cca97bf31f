//! Locks — striped per-key mutual exclusion.
//!
//! Grounded on the container driver's use of `DashMap` for its inventory:
//! fine-grained concurrent access instead of a single global mutex around
//! every mutation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of lazily-created per-key async mutexes.
///
/// Acquiring the same key twice concurrently serializes the two callers;
/// distinct keys never contend with each other.
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    /// Acquire the lock for `key`, creating it on first use. The returned
    /// guard holds the lock until dropped.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = Arc::new(KeyedLocks::new());
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();

        for _ in 0..20 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("bucket/object").await;
                let before = counter.load(Ordering::SeqCst);
                tokio::task::yield_now().await;
                counter.store(before + 1, Ordering::SeqCst);
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let locks = KeyedLocks::new();
        let g1 = locks.acquire("a").await;
        let g2 = locks.acquire("b").await;
        drop(g1);
        drop(g2);
    }
}
