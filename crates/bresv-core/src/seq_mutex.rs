//! Sequenced exclusive lock: the priority-aware mutex under every resource.
//!
//! A [`SeqMutex`] is an exclusive lock whose holder and waiters are
//! identified by batch sequence numbers. Contention resolves by age:
//! - `try_lock` never blocks; it refuses a free lock if a strictly older
//!   waiter is already queued, so an old batch can never be starved by a
//!   stream of young ones barging in.
//! - `lock_slow` queues the caller and grants the lock to the oldest
//!   registered waiter each time it frees.
//!
//! Waiters registered without a ticket (untracked) sort before every
//! ticketed waiter and cannot be cancelled.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::ticket::{BatchSeq, CancelToken};

/// How often a cancellable waiter re-checks its token while blocked.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Queue key for untracked holders; outranks every real sequence.
const UNTRACKED_KEY: u64 = 0;

// ---------------------------------------------------------------------------
// Holder
// ---------------------------------------------------------------------------

/// Identity of a lock holder or waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    /// No ticket: always-highest priority, waits uninterruptibly.
    Untracked,
    /// A ticketed batch, ranked by its sequence number.
    Batch(BatchSeq),
}

impl Holder {
    /// Priority key in the waiter queue. Untracked maps to 0, which no
    /// [`BatchSeq`] can occupy.
    #[inline]
    fn queue_key(self) -> u64 {
        match self {
            Holder::Untracked => UNTRACKED_KEY,
            Holder::Batch(seq) => seq.raw(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a `try_lock` did not take the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryLockError {
    /// This exact ticketed holder already holds the lock (a duplicate entry
    /// in the same batch).
    AlreadyHeld,
    /// Held by someone else, or a strictly older waiter is queued.
    Contended,
}

/// A cancellable `lock_slow` observed its token. Nothing is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCancelled;

// ---------------------------------------------------------------------------
// SeqMutex
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SeqMutexState {
    holder: Option<Holder>,
    /// Queue key -> number of waiters at that key. Ticketed keys hold at
    /// most one waiter (sequences are unique); untracked waiters share
    /// [`UNTRACKED_KEY`].
    waiters: BTreeMap<u64, u32>,
}

impl SeqMutexState {
    /// Whether `key` is the best (oldest) key currently queued.
    fn is_front(&self, key: u64) -> bool {
        match self.waiters.keys().next() {
            Some(&front) => front >= key,
            None => true,
        }
    }

    fn enqueue(&mut self, key: u64) {
        *self.waiters.entry(key).or_insert(0) += 1;
    }

    fn dequeue(&mut self, key: u64) {
        match self.waiters.get_mut(&key) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.waiters.remove(&key);
            }
            None => debug_assert!(false, "dequeue of unregistered waiter"),
        }
    }
}

/// Exclusive lock with sequence-ranked contention.
#[derive(Debug, Default)]
pub struct SeqMutex {
    state: Mutex<SeqMutexState>,
    unlocked: Condvar,
}

impl SeqMutex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquisition attempt by `as_holder`.
    ///
    /// Fails with [`TryLockError::AlreadyHeld`] when the same ticketed
    /// holder already owns the lock (the duplicate signal), and with
    /// [`TryLockError::Contended`] when someone else owns it or an older
    /// waiter is queued. Two untracked callers cannot be told apart, so an
    /// untracked caller re-trying its own lock reads as contention.
    pub fn try_lock(&self, as_holder: Holder) -> Result<(), TryLockError> {
        let mut state = self.state.lock();
        match state.holder {
            Some(holder) => {
                if holder == as_holder && matches!(holder, Holder::Batch(_)) {
                    Err(TryLockError::AlreadyHeld)
                } else {
                    Err(TryLockError::Contended)
                }
            }
            None => {
                // Free, but an older waiter in the queue still outranks us.
                if let Some(&front) = state.waiters.keys().next() {
                    if front <= as_holder.queue_key() {
                        return Err(TryLockError::Contended);
                    }
                }
                state.holder = Some(as_holder);
                Ok(())
            }
        }
    }

    /// Blocking acquisition by `as_holder`; the wound-wait slow path.
    ///
    /// The caller must hold nothing else under this protocol (it has fully
    /// backed off). Queues the caller, then sleeps until it is both the
    /// oldest queued waiter and the lock is free. With `cancel` set, the
    /// token is re-checked on a short tick and observing it returns
    /// [`WaitCancelled`] with nothing held.
    pub fn lock_slow(
        &self,
        as_holder: Holder,
        cancel: Option<&CancelToken>,
    ) -> Result<(), WaitCancelled> {
        let key = as_holder.queue_key();
        let mut state = self.state.lock();
        state.enqueue(key);
        loop {
            if state.holder.is_none() && state.is_front(key) {
                state.dequeue(key);
                state.holder = Some(as_holder);
                return Ok(());
            }
            match cancel {
                Some(token) => {
                    if token.is_cancelled() {
                        trace!(key, "sequenced wait cancelled");
                        state.dequeue(key);
                        // The next-oldest waiter may now be eligible.
                        self.unlocked.notify_all();
                        return Err(WaitCancelled);
                    }
                    let _ = self.unlocked.wait_for(&mut state, CANCEL_POLL_INTERVAL);
                }
                None => self.unlocked.wait(&mut state),
            }
        }
    }

    /// Release the lock held by `as_holder` and wake queued waiters.
    pub fn unlock(&self, as_holder: Holder) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.holder, Some(as_holder), "unlock by non-holder");
        state.holder = None;
        let contended = !state.waiters.is_empty();
        drop(state);
        if contended {
            self.unlocked.notify_all();
        }
    }

    /// Current holder, if any. Diagnostic only; racy by nature.
    #[must_use]
    pub fn holder(&self) -> Option<Holder> {
        self.state.lock().holder
    }

    /// Whether the lock is currently held. Diagnostic only.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.holder().is_some()
    }
}
