//! The three batch operations: reserve, backoff, fence-and-release.
//!
//! A caller builds a [`ValidateList`] naming every resource its protected
//! operation will touch, then runs:
//!
//! ```text
//! reserve -> [protected operation] -> fence_and_release
//!                    \__ on any failure: backoff
//! ```
//!
//! [`reserve`] locks the whole list or nothing. Contention is resolved
//! wound-wait style: the loser releases everything it holds, waits for the
//! one contended resource (oldest batch first), then restarts the scan with
//! that resource parked at the front of the list. Because a waiter never
//! holds anything while blocked, no cycle of mutual waiting can form, and
//! because waiters are served oldest-first, every batch eventually gets
//! through.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::ReserveError;
use crate::lru::LruList;
use crate::resv::{Fence, MarkerKind, Resource};
use crate::seq_mutex::{Holder, TryLockError};
use crate::ticket::{AcquireTicket, CancelToken};

// ---------------------------------------------------------------------------
// ValidateEntry / ValidateList
// ---------------------------------------------------------------------------

/// One resource's membership in a batch.
#[derive(Debug, Clone)]
pub struct ValidateEntry {
    pub resource: Arc<Resource>,
    /// Shared marker slots to preallocate; 0 means the batch will attach an
    /// exclusive marker on fence instead.
    pub shared_slots: usize,
}

impl ValidateEntry {
    #[must_use]
    pub fn new(resource: Arc<Resource>, shared_slots: usize) -> Self {
        Self {
            resource,
            shared_slots,
        }
    }
}

/// One caller's atomic batch. Order is the initial lock-attempt order and
/// carries no other meaning; [`reserve`] reorders entries as it retries.
pub type ValidateList = Vec<ValidateEntry>;

fn holder_for(ticket: Option<&AcquireTicket>) -> Holder {
    match ticket {
        Some(ticket) => Holder::Batch(ticket.seq()),
        None => Holder::Untracked,
    }
}

/// Release `list[..upto]` in reverse acquisition order. The entry at
/// `upto` itself is not held (its lock attempt failed), so there is
/// nothing to release for it. Does not touch the LRU list: a rollback
/// leaves no recency trace.
fn unwind_prefix(list: &ValidateList, upto: usize, holder: Holder) {
    for entry in list[..upto].iter().rev() {
        entry.resource.resv().lock().unlock(holder);
    }
}

// ---------------------------------------------------------------------------
// reserve
// ---------------------------------------------------------------------------

/// Exclusively lock every resource in `list` and preallocate every
/// requested shared-marker slot, or lock nothing.
///
/// On success the ticket is handed back for [`fence_and_release`] or
/// [`backoff`]; on any error the batch is fully unwound and the ticket is
/// consumed (invalidated). Entries naming a resource the batch already
/// locked are diverted to `dups` — the caller must reconcile them and must
/// not fence or back off the diverted entries. With no `dups` output a
/// duplicate is a terminal [`ReserveError::DuplicateEntry`].
///
/// Waits are cancellable only when `interruptible` is set and the ticket
/// was begun cancellable; a batch with no ticket waits uninterruptibly at
/// highest priority.
pub fn reserve(
    list: &mut ValidateList,
    ticket: Option<AcquireTicket>,
    interruptible: bool,
    mut dups: Option<&mut ValidateList>,
) -> Result<Option<AcquireTicket>, ReserveError> {
    if list.is_empty() {
        return Ok(ticket);
    }

    let holder = holder_for(ticket.as_ref());
    let cancel: Option<CancelToken> = if interruptible {
        ticket
            .as_ref()
            .filter(|t| t.is_cancellable())
            .map(AcquireTicket::canceller)
    } else {
        None
    };

    let mut idx = 0;
    while idx < list.len() {
        let resource = Arc::clone(&list[idx].resource);
        let shared_slots = list[idx].shared_slots;
        let resv = resource.resv();

        match resv.lock().try_lock(holder) {
            Ok(()) => {
                if shared_slots > 0 {
                    if let Err(exhausted) = resv.reserve_shared_slots(shared_slots) {
                        // Exhaustion unwinds exactly like contention, but
                        // waiting cannot fix a quota: terminal.
                        resv.lock().unlock(holder);
                        unwind_prefix(list, idx, holder);
                        return Err(ReserveError::Exhausted {
                            resource: resource.id(),
                            requested: exhausted.requested,
                            limit: exhausted.limit,
                        });
                    }
                }
                idx += 1;
            }
            Err(TryLockError::AlreadyHeld) => {
                // The caller listed this resource twice; the first entry
                // already holds the lock. Divert and rescan the position
                // the entry vacated.
                trace!(resource = %resource.id(), "duplicate entry in batch");
                let entry = list.remove(idx);
                match dups.as_deref_mut() {
                    Some(out) => out.push(entry),
                    None => {
                        unwind_prefix(list, idx, holder);
                        return Err(ReserveError::DuplicateEntry(resource.id()));
                    }
                }
            }
            Err(TryLockError::Contended) => {
                // We lost out. Drop every reservation, wait for just this
                // resource, then start the scan over with it parked at the
                // front so the rest of the batch is re-attempted.
                unwind_prefix(list, idx, holder);
                debug!(
                    resource = %resource.id(),
                    holder = ?holder,
                    "batch contended; backed off, waiting"
                );
                if resv.lock().lock_slow(holder, cancel.as_ref()).is_err() {
                    return Err(ReserveError::Cancelled {
                        resource: resource.id(),
                    });
                }
                if shared_slots > 0 {
                    if let Err(exhausted) = resv.reserve_shared_slots(shared_slots) {
                        resv.lock().unlock(holder);
                        return Err(ReserveError::Exhausted {
                            resource: resource.id(),
                            requested: exhausted.requested,
                            limit: exhausted.limit,
                        });
                    }
                }
                list[..=idx].rotate_right(1);
                idx = 1;
            }
        }
    }
    Ok(ticket)
}

// ---------------------------------------------------------------------------
// backoff
// ---------------------------------------------------------------------------

/// Abandon a reservation without running the protected operation: move
/// every resource to the LRU tail, unlock it, and invalidate the ticket.
/// Leaves no marker behind.
pub fn backoff(lru: &LruList, list: &ValidateList, ticket: Option<AcquireTicket>) {
    if list.is_empty() {
        return;
    }
    let holder = holder_for(ticket.as_ref());

    let mut order = lru.lock();
    for entry in list {
        order.move_to_tail(entry.resource.id());
        entry.resource.resv().lock().unlock(holder);
    }
}

// ---------------------------------------------------------------------------
// fence_and_release
// ---------------------------------------------------------------------------

/// Complete a reservation: attach `fence` to every resource (shared when
/// the entry reserved shared slots, exclusive otherwise), move it to the
/// LRU tail, unlock it, and invalidate the ticket.
///
/// The whole sweep runs under one LRU critical section, like [`backoff`].
pub fn fence_and_release(
    lru: &LruList,
    list: &ValidateList,
    ticket: Option<AcquireTicket>,
    fence: Fence,
) {
    if list.is_empty() {
        return;
    }
    let holder = holder_for(ticket.as_ref());

    let mut order = lru.lock();
    for entry in list {
        let kind = if entry.shared_slots > 0 {
            MarkerKind::Shared
        } else {
            MarkerKind::Exclusive
        };
        entry.resource.resv().attach_marker(kind, fence);
        order.move_to_tail(entry.resource.id());
        entry.resource.resv().lock().unlock(holder);
    }
}
