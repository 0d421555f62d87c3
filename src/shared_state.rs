//! # Shared Station State
//!
//! The single place where the latest [`Reading`] and its [`AlertState`] live.
//! The lock is private: callers only get [`SharedState::write`] and
//! [`SharedState::read`], and both hold it for one copy of a small struct.
//! The state is derived inside the same critical section that stores the
//! reading, so no reader can see a pair that breaks the threshold rule.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::{AlertState, Reading, SharedSnapshot, Thresholds};

#[derive(Debug)]
struct Inner {
    snapshot: SharedSnapshot,
    /// Number of readings written since startup
    samples: u64,
}

/// Cloneable handle to the station's one [`SharedSnapshot`].
#[derive(Clone, Debug)]
pub struct SharedState {
    inner: Arc<Mutex<Inner>>,
    thresholds: Thresholds,
}

impl SharedState {
    /// Start from the zero reading in NORMAL state.
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                snapshot: SharedSnapshot::default(),
                samples: 0,
            })),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Store `reading`, derive its state and return that state.
    pub fn write(&self, reading: Reading) -> AlertState {
        let mut inner = self.lock();
        let state = self.thresholds.derive(&reading);
        inner.snapshot = SharedSnapshot { reading, state };
        inner.samples += 1;
        state
    }

    /// Copy of the current snapshot.
    pub fn read(&self) -> SharedSnapshot {
        self.lock().snapshot
    }

    /// Copy of the current snapshot, or `None` before the first sample.
    pub fn read_sampled(&self) -> Option<SharedSnapshot> {
        let inner = self.lock();
        (inner.samples > 0).then_some(inner.snapshot)
    }

    /// Re-apply the threshold rule to the stored reading.
    ///
    /// The state is always threshold-derived, so this can only confirm
    /// what is already stored.
    pub fn rederive(&self) -> AlertState {
        let mut inner = self.lock();
        let state = self.thresholds.derive(&inner.snapshot.reading);
        inner.snapshot.state = state;
        state
    }

    // Every write replaces the snapshot whole, so a guard poisoned by a
    // panicking holder still protects a consistent value.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
