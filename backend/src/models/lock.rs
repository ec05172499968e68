//! Per-object spin lock
//!
//! Objects in the same bucket run concurrently. When more than one of them
//! accumulates into a shared target (several links feeding one node, say),
//! the writer takes the target's lock for the duration of the update. The
//! scheduler itself never takes these locks.
//!
//! # Example
//! ```
//! use grid_simulator_core_rs::models::lock::ObjectLock;
//!
//! let lock = ObjectLock::new();
//! {
//!     let _guard = lock.lock();
//!     assert!(lock.is_locked());
//! }
//! assert!(!lock.is_locked());
//! assert_eq!(lock.stats().acquisitions, 1);
//! ```

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Acquisition counters for contention reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Successful acquisitions
    pub acquisitions: u64,
    /// Failed attempts that had to spin
    pub spins: u64,
}

impl LockStats {
    /// Share of attempts that found the lock taken, in percent
    pub fn contention_percent(&self) -> f64 {
        let attempts = self.acquisitions + self.spins;
        if attempts == 0 {
            return 0.0;
        }
        self.spins as f64 / attempts as f64 * 100.0
    }
}

/// Lightweight test-and-test-and-set spin lock
#[derive(Debug, Default)]
pub struct ObjectLock {
    locked: AtomicBool,
    acquisitions: AtomicU64,
    spins: AtomicU64,
}

impl ObjectLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spin until the lock is held
    pub fn lock(&self) -> ObjectLockGuard<'_> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.spins.fetch_add(1, Ordering::Relaxed);
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        ObjectLockGuard { lock: self }
    }

    /// Take the lock only if it is free
    pub fn try_lock(&self) -> Option<ObjectLockGuard<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| {
                self.acquisitions.fetch_add(1, Ordering::Relaxed);
                ObjectLockGuard { lock: self }
            })
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            spins: self.spins.load(Ordering::Relaxed),
        }
    }
}

/// Releases the lock when dropped
#[derive(Debug)]
pub struct ObjectLockGuard<'a> {
    lock: &'a ObjectLock,
}

impl Drop for ObjectLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
