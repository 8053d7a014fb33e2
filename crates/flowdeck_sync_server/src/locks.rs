//! Per-owner, per-kind mutual exclusion.
//!
//! Bulk sync requests from the same user for the same entity kind are
//! applied one at a time so that identity lookups and last-write-wins
//! decisions observe each other's writes. Different users, and different
//! kinds of the same user, proceed in parallel.
//!
//! A caller holds at most one kind lock at a time.

use flowdeck_sync_protocol::EntityKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Key of a lock scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    /// Owning user.
    pub owner: String,
    /// Entity kind.
    pub kind: EntityKind,
}

/// Registry of async locks keyed by `(owner, kind)`.
///
/// Entries are created on demand and removed when the last holder or
/// waiter goes away.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    entries: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the scope of `(owner, kind)`.
    pub async fn lock(&self, owner: &str, kind: EntityKind) -> KeyedGuard<'_> {
        let key = LockKey {
            owner: owner.to_string(),
            kind,
        };
        let mutex = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(key.clone()).or_default())
        };
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    /// Returns the number of live lock entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no scope is held or awaited.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds a lock scope until dropped.
#[derive(Debug)]
pub struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedGuard<'_> {
    /// Returns the key of the held scope.
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut entries = self.locks.entries.lock();
        if let Some(entry) = entries.get(&self.key) {
            // Only the registry references it: nobody holds or awaits it.
            if Arc::strong_count(entry) == 1 {
                entries.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn entries_removed_after_release() {
        let locks = KeyedLocks::new();
        {
            let guard = locks.lock("u1", EntityKind::SiteBlocker).await;
            assert_eq!(guard.key().owner, "u1");
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("u1", EntityKind::SiteBlocker).await;
        let _b = locks.lock("u1", EntityKind::PomodoroTimer).await;
        let _c = locks.lock("u2", EntityKind::SiteBlocker).await;
        assert_eq!(locks.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                tokio::spawn(async move {
                    let _guard = locks.lock("u1", EntityKind::SiteBlocker).await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }
}
