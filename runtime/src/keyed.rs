//! Per-key async mutexes.
//!
//! The coordinator must serialize event handling **per correlation id** while
//! keeping unrelated sagas fully parallel. [`KeyedMutex`] hands out one async
//! mutex per key on demand; holding the guard serializes all work for that
//! key, and keys never contend with each other.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// A map of lazily created async mutexes, one per key.
///
/// Lock acquisition is two-phase: a short synchronous map access to find or
/// create the key's mutex, then an async wait on that mutex alone. The map
/// lock is never held across an await.
pub struct KeyedMutex<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the mutex for `key`, waiting if another task holds it.
    ///
    /// # Panics
    ///
    /// Panics only if the internal map mutex is poisoned, which cannot
    /// happen: no code path panics while holding it.
    #[allow(clippy::expect_used)]
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().expect("keyed mutex map poisoned");
            Arc::clone(
                locks
                    .entry(key)
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        entry.lock_owned().await
    }

    /// Drop lock entries no task currently holds or awaits.
    ///
    /// Callers invoke this when a key retires (a saga reaches a terminal
    /// status) so the map does not grow with the lifetime total of keys.
    #[allow(clippy::expect_used)]
    pub fn release_idle(&self) {
        let mut locks = self.locks.lock().expect("keyed mutex map poisoned");
        locks.retain(|_, entry| Arc::strong_count(entry) > 1);
    }

    /// Number of keys currently tracked.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().expect("keyed mutex map poisoned").len()
    }

    /// Whether no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes() {
        let keyed = Arc::new(KeyedMutex::new());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let keyed = Arc::clone(&keyed);
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _guard = keyed.lock("saga-1").await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_run_in_parallel() {
        let keyed = Arc::new(KeyedMutex::new());

        let a = keyed.lock("saga-a").await;
        // A second key must not block behind the first.
        let b = tokio::time::timeout(Duration::from_millis(50), keyed.lock("saga-b")).await;
        assert!(b.is_ok());
        drop(a);
    }

    #[tokio::test]
    async fn release_idle_drops_unheld_keys() {
        let keyed = KeyedMutex::new();
        {
            let _guard = keyed.lock("saga-1").await;
            keyed.release_idle();
            // Held key survives.
            assert_eq!(keyed.len(), 1);
        }
        keyed.release_idle();
        assert!(keyed.is_empty());
    }
}
