//! Shared workload helpers for the end-to-end scenarios and benches.

use std::sync::Arc;

use bresv_core::{Resource, ValidateEntry, ValidateList};

/// Build a pool of `n` fresh resources.
#[must_use]
pub fn resource_pool(n: usize) -> Vec<Arc<Resource>> {
    (0..n).map(|_| Arc::new(Resource::new())).collect()
}

/// Build a validate list over the pool from `(index, shared_slots)` picks.
#[must_use]
pub fn pick_list(pool: &[Arc<Resource>], picks: &[(usize, usize)]) -> ValidateList {
    picks
        .iter()
        .map(|&(i, shared)| ValidateEntry::new(Arc::clone(&pool[i]), shared))
        .collect()
}

/// Minimal deterministic PRNG (xorshift64*) for reproducible overlap
/// patterns in stress scenarios.
#[derive(Debug, Clone)]
pub struct XorShift {
    state: u64,
}

impl XorShift {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Uniform-ish pick in `0..bound`.
    ///
    /// # Panics
    /// Panics if `bound` is zero.
    pub fn pick(&mut self, bound: usize) -> usize {
        assert!(bound > 0, "pick from empty range");
        (self.next_u64() % bound as u64) as usize
    }
}
