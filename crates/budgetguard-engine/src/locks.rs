//! Per-bucket lock table.
//!
//! Each `(connection, day)` bucket gets its own mutex, created on first use.
//! Operations on the same bucket run one at a time; operations on different
//! buckets never wait on each other.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use budgetguard_types::BucketKey;

/// Lazily populated map of bucket mutexes.
#[derive(Debug, Default)]
pub struct BucketLocks {
    slots: Mutex<HashMap<BucketKey, Arc<Mutex<()>>>>,
}

impl BucketLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex for `key`, created if absent.
    fn slot(&self, key: &BucketKey) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// The guarded value is `()`, so a panic in another holder leaves nothing
    /// inconsistent behind; poisoning is cleared rather than propagated.
    pub fn with_lock<T>(&self, key: &BucketKey, f: impl FnOnce() -> T) -> T {
        let slot = self.slot(key);
        let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Drop mutexes nobody is holding or waiting on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        // The map's own Arc is the only reference to an idle slot.
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - slots.len()
    }

    /// Number of buckets with a live mutex.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use budgetguard_types::{BudgetDate, ConnectionId};

    use super::*;

    fn key(conn: &str) -> BucketKey {
        BucketKey::new(
            ConnectionId::from(conn),
            BudgetDate::from_ymd(2025, 1, 31).unwrap(),
        )
    }

    #[test]
    fn with_lock_returns_closure_value() {
        let locks = BucketLocks::new();
        let value = locks.with_lock(&key("a"), || 42);
        assert_eq!(value, 42);
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn same_bucket_is_serialised() {
        let locks = Arc::new(BucketLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..50 {
                        locks.with_lock(&key("shared"), || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prune_drops_idle_slots_only() {
        let locks = BucketLocks::new();
        locks.with_lock(&key("a"), || ());
        locks.with_lock(&key("b"), || ());
        assert_eq!(locks.len(), 2);

        let held = locks.slot(&key("a"));
        assert_eq!(locks.prune(), 1, "only the idle slot for b is dropped");
        assert_eq!(locks.len(), 1);

        drop(held);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }
}
