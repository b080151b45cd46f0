//! Global recency list: most-recently-released resources sit at the tail.
//!
//! One short critical section protects the whole list. Batch release sweeps
//! ([`crate::batch::backoff`], [`crate::batch::fence_and_release`]) hold a
//! single [`LruGuard`] for the duration of the sweep so the LRU mutation of
//! one batch is atomic with respect to other batches' releases. The guard
//! must never be held across a blocking wait.

use std::collections::VecDeque;

use parking_lot::{Mutex, MutexGuard};

use crate::resv::ResourceId;

/// Recency-ordered list of resource ids; head is the best eviction victim.
#[derive(Debug, Default)]
pub struct LruList {
    order: Mutex<VecDeque<ResourceId>>,
}

impl LruList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the list's critical section.
    #[must_use]
    pub fn lock(&self) -> LruGuard<'_> {
        LruGuard {
            order: self.order.lock(),
        }
    }

    /// Snapshot of the current order, head (coldest) first.
    #[must_use]
    pub fn order(&self) -> Vec<ResourceId> {
        self.order.lock().iter().copied().collect()
    }

    /// Number of tracked resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.lock().is_empty()
    }
}

/// Exclusive access to the recency order for one release sweep.
pub struct LruGuard<'a> {
    order: MutexGuard<'a, VecDeque<ResourceId>>,
}

impl LruGuard<'_> {
    /// Mark `id` most recently used: last in line for eviction. Inserts
    /// ids the list has not seen before.
    pub fn move_to_tail(&mut self, id: ResourceId) {
        self.order.retain(|&tracked| tracked != id);
        self.order.push_back(id);
    }

    /// Drop `id` from the list entirely (resource destroyed externally).
    pub fn remove(&mut self, id: ResourceId) {
        self.order.retain(|&tracked| tracked != id);
    }
}
