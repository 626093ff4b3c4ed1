//! Per-key async mutual exclusion
//!
//! Each key gets its own `tokio::sync::Mutex` on first use. The entry is
//! dropped from the arena when the last holder or waiter lets go, so the
//! map only ever contains keys with work in flight.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

/// Arena of per-key locks
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    slots: Arc<Mutex<HashMap<K, Slot>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// The lock is released when the guard drops, including on panic or
    /// cancellation of the holder.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(key.clone()).or_default().clone()
        };

        // Cleans up the entry if this wait is cancelled
        let mut pending = PendingLock {
            key: Some(key),
            slot: Some(Arc::clone(&slot)),
            slots: Arc::clone(&self.slots),
        };
        let guard = slot.lock_owned().await;

        pending.slot = None;
        let key = pending.key.take();
        KeyedGuard {
            key,
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Keys with a holder or waiter
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Waiter registration, dropped unarmed once the lock is acquired
struct PendingLock<K: Eq + Hash + Clone> {
    key: Option<K>,
    slot: Option<Slot>,
    slots: Arc<Mutex<HashMap<K, Slot>>>,
}

impl<K: Eq + Hash + Clone> Drop for PendingLock<K> {
    fn drop(&mut self) {
        if let (Some(key), Some(slot)) = (self.key.take(), self.slot.take()) {
            release_entry(&self.slots, &key, slot);
        }
    }
}

/// Held lock on one key
pub struct KeyedGuard<K: Eq + Hash + Clone> {
    key: Option<K>,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Mutex<HashMap<K, Slot>>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        let (Some(key), Some(guard)) = (self.key.take(), self.guard.take()) else {
            return;
        };
        let slot = OwnedMutexGuard::mutex(&guard).clone();
        drop(guard);
        release_entry(&self.slots, &key, slot);
    }
}

/// Drop the map entry for `key` if `slot` is its last user
fn release_entry<K: Eq + Hash>(slots: &Mutex<HashMap<K, Slot>>, key: &K, slot: Slot) {
    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
    // Remaining references: the map entry and `slot`. Anything above
    // that is a holder or waiter that will reuse the entry.
    if Arc::strong_count(&slot) <= 2 {
        if let Some(current) = slots.get(key) {
            if Arc::ptr_eq(current, &slot) {
                slots.remove(key);
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
    async fn test_entry_removed_when_uncontended() {
        let locks: KeyedLocks<u32> = KeyedLocks::new();
        {
            let _guard = locks.lock(1).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::<&'static str>::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("chunk").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks: KeyedLocks<u32> = KeyedLocks::new();
        let _a = locks.lock(1).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(2)).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_entry() {
        let locks: KeyedLocks<u32> = KeyedLocks::new();
        let holder = locks.lock(3).await;

        let mut waiter = Box::pin(locks.lock(3));
        let waited = tokio::time::timeout(Duration::from_millis(20), waiter.as_mut()).await;
        assert!(waited.is_err(), "waiter should block behind the holder");

        // Holder leaves while the waiter is still registered
        drop(holder);
        assert_eq!(locks.len(), 1);

        drop(waiter);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_cancelled_before_holder_releases() {
        let locks: KeyedLocks<u32> = KeyedLocks::new();
        let holder = locks.lock(4).await;

        let waited = tokio::time::timeout(Duration::from_millis(20), locks.lock(4)).await;
        assert!(waited.is_err());
        assert_eq!(locks.len(), 1);

        drop(holder);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_holder_releases_lock() {
        let locks = Arc::new(KeyedLocks::<u32>::new());

        let held = Arc::clone(&locks);
        let result = tokio::spawn(async move {
            let _guard = held.lock(7).await;
            panic!("holder failed");
        })
        .await;
        assert!(result.is_err());

        let next = tokio::time::timeout(Duration::from_millis(100), locks.lock(7)).await;
        assert!(next.is_ok(), "lock should be free after the holder panicked");
    }
}
