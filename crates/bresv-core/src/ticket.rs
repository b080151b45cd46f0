//! Acquisition tickets: total ordering of concurrent batches.
//!
//! Every batch that wants to reserve a set of resources first draws an
//! [`AcquireTicket`] from an [`AcquireClass`]. The ticket carries a strictly
//! increasing [`BatchSeq`]; when two batches contend for the same resource,
//! the one with the lower (older) sequence wins. This is the whole deadlock
//! resolution scheme — there is no global lock order, only age.

use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// BatchSeq
// ---------------------------------------------------------------------------

/// Priority sequence number of one batch. Lower = older = wins contention.
///
/// Allocated by [`AcquireClass::begin_batch`]; no two live tickets ever
/// carry the same sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchSeq(NonZeroU64);

impl BatchSeq {
    /// Construct from a raw nonzero value. Zero is reserved for untracked
    /// holders in the waiter queue.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Raw sequence value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0.get()
    }

    /// Priority comparison: `true` if `self` was allocated before `other`
    /// and therefore outranks it under contention.
    #[inline]
    #[must_use]
    pub fn is_older_than(self, other: BatchSeq) -> bool {
        self.0 < other.0
    }
}

impl std::fmt::Display for BatchSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "seq#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// External cancellation signal for a cancellable batch.
///
/// Cloneable handle; any clone may call [`CancelToken::cancel`] to make a
/// blocked `reserve` give up. The flag is only consulted while the batch is
/// blocked waiting for a contended resource, never mid-critical-section.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the owning batch's current and future waits.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// AcquireTicket
// ---------------------------------------------------------------------------

/// Per-batch acquisition context.
///
/// Created at batch start, consumed (invalidated) by `backoff`,
/// `fence_and_release`, or any failed `reserve`. A batch run without a
/// ticket is implicitly always-highest-priority and waits uninterruptibly.
#[derive(Debug)]
pub struct AcquireTicket {
    seq: BatchSeq,
    cancellable: bool,
    cancel: CancelToken,
}

// No two live tickets carry the same sequence, so `seq` equality is
// ticket identity. (A derive is blocked by the atomic in `CancelToken`.)
impl PartialEq for AcquireTicket {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for AcquireTicket {}

impl AcquireTicket {
    #[inline]
    #[must_use]
    pub fn seq(&self) -> BatchSeq {
        self.seq
    }

    /// Whether waits made under this ticket may be cancelled externally.
    #[inline]
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        self.cancellable
    }

    /// Cloneable handle for signalling cancellation from another thread.
    #[must_use]
    pub fn canceller(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Invalidate the ticket. Must only be called once every resource it
    /// held has been released; dropping the ticket is equivalent.
    pub fn end_batch(self) {}
}

// ---------------------------------------------------------------------------
// AcquireClass
// ---------------------------------------------------------------------------

/// Allocator of batch sequence numbers.
///
/// One class per contention domain: only tickets drawn from the same class
/// are comparable. Safe to share across threads; allocation is a single
/// atomic increment.
#[derive(Debug)]
pub struct AcquireClass {
    next_seq: AtomicU64,
}

impl AcquireClass {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(1),
        }
    }

    /// Open a new batch: allocate the next sequence number.
    #[must_use]
    pub fn begin_batch(&self, cancellable: bool) -> AcquireTicket {
        let raw = self.next_seq.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and would take centuries of continuous
        // allocation to wrap a u64.
        let seq = match BatchSeq::new(raw) {
            Some(seq) => seq,
            None => unreachable!("batch sequence counter wrapped"),
        };
        AcquireTicket {
            seq,
            cancellable,
            cancel: CancelToken::new(),
        }
    }
}

impl Default for AcquireClass {
    fn default() -> Self {
        Self::new()
    }
}
