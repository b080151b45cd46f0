//! Wound-wait batch reservation: deadlock-free all-or-nothing locking of
//! unordered resource sets.
//!
//! A caller that must atomically hold an arbitrary batch of resources —
//! with other callers concurrently reserving overlapping batches in
//! different orders — cannot rely on a global lock order. Instead, batches
//! are ranked by an [`AcquireTicket`] sequence number and contention
//! resolves by age: the loser fully backs off, waits for the single
//! contended resource (served oldest-first), and restarts. No waiter ever
//! holds a partial set, so deadlock is impossible; sequence ranking bounds
//! starvation.
//!
//! The programmatic surface is exactly four operations:
//!
//! - [`batch::reserve`] — lock every entry of a [`ValidateList`] or nothing.
//! - [`batch::backoff`] — abandon a held reservation, restoring LRU order.
//! - [`batch::fence_and_release`] — attach a completion [`Fence`] to every
//!   resource and release it.
//! - [`AcquireClass::begin_batch`] / [`AcquireTicket::end_batch`] — ticket
//!   lifecycle.

pub mod batch;
pub mod error;
pub mod lru;
pub mod resv;
pub mod seq_mutex;
pub mod ticket;

pub use batch::{ValidateEntry, ValidateList, backoff, fence_and_release, reserve};
pub use error::ReserveError;
pub use lru::{LruGuard, LruList};
pub use resv::{
    DEFAULT_SHARED_SLOT_LIMIT, Fence, MarkerKind, Resource, ResourceId, ResvObject, SlotsExhausted,
};
pub use seq_mutex::{Holder, SeqMutex, TryLockError, WaitCancelled};
pub use ticket::{AcquireClass, AcquireTicket, BatchSeq, CancelToken};
