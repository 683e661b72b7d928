//! Per-fingerprint build coordination
//!
//! Each fingerprint gets its own async mutex, created on first use and
//! dropped again once nobody holds or waits for it. Holding the guard means
//! "I am the one building this fingerprint"; everyone else requesting the
//! same key waits and then finds the published entry.

use dashmap::DashMap;
use kiln_hash::Fingerprint;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<Fingerprint, Arc<Mutex<()>>>;

#[derive(Debug, Default, Clone)]
pub(crate) struct KeyLocks {
    locks: Arc<LockMap>,
}

impl KeyLocks {
    /// Acquire the lock for `fingerprint`
    ///
    /// Returns the guard and whether the caller had to wait for another
    /// holder. `on_wait` runs once before waiting.
    pub(crate) async fn acquire(&self, fingerprint: Fingerprint, on_wait: impl FnOnce()) -> KeyGuard {
        let mutex = Arc::clone(
            &self
                .locks
                .entry(fingerprint)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );

        let guard = match Arc::clone(&mutex).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                on_wait();
                mutex.lock_owned().await
            }
        };

        KeyGuard {
            fingerprint,
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive right to build one fingerprint
///
/// Publish before dropping the guard: a task that acquires the key next
/// is expected to find the entry in the cache.
#[derive(Debug)]
pub struct KeyGuard {
    fingerprint: Fingerprint,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let guard = self.guard.take();
        // One reference in the map plus the one inside our guard: no waiters
        self.locks
            .remove_if(&self.fingerprint, |_, mutex| Arc::strong_count(mutex) <= 2);
        drop(guard);
    }
}
