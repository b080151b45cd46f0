//! Per-resource reservation object: sequenced lock plus completion markers.
//!
//! A [`ResvObject`] pairs the [`SeqMutex`] guarding exclusive access with
//! the completion-marker state left behind by finished batches:
//!
//! - any number of **shared** markers, consumable by future lockers without
//!   full exclusivity on the dependency;
//! - at most one **exclusive** marker, which supersedes (clears) all shared
//!   markers when attached.
//!
//! Shared marker slots must be preallocated while the lock is held, before
//! the protected operation runs; preallocation is the only operation here
//! that can fail, and it fails by quota, not by ownership conflict.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::seq_mutex::SeqMutex;

/// Default cap on shared marker slots per resource.
pub const DEFAULT_SHARED_SLOT_LIMIT: usize = 1024;

// ---------------------------------------------------------------------------
// ResourceId / Fence
// ---------------------------------------------------------------------------

/// Stable identity of a resource, used as the LRU-list key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "res#{}", self.0)
    }
}

/// Opaque completion marker attached to resources when a batch finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fence(u64);

impl Fence {
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// How a completion marker is recorded on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// Consumes one preallocated slot; coexists with other shared markers.
    Shared,
    /// Replaces the exclusive marker and clears all shared markers.
    Exclusive,
}

// ---------------------------------------------------------------------------
// ResvObject
// ---------------------------------------------------------------------------

/// Shared-slot preallocation failed: the per-resource quota is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotsExhausted {
    pub requested: usize,
    pub limit: usize,
}

#[derive(Debug)]
struct MarkerState {
    /// Slots guaranteed available for shared markers; grows via
    /// [`ResvObject::reserve_shared_slots`], never shrinks below `shared.len()`.
    shared_capacity: usize,
    shared: SmallVec<[Fence; 4]>,
    exclusive: Option<Fence>,
}

/// Reservation state of one resource.
#[derive(Debug)]
pub struct ResvObject {
    lock: SeqMutex,
    markers: Mutex<MarkerState>,
    slot_limit: usize,
}

impl ResvObject {
    #[must_use]
    pub fn new() -> Self {
        Self::with_slot_limit(DEFAULT_SHARED_SLOT_LIMIT)
    }

    /// Build with a custom shared-slot quota (tests use tiny quotas to
    /// exercise the exhaustion path).
    #[must_use]
    pub fn with_slot_limit(slot_limit: usize) -> Self {
        Self {
            lock: SeqMutex::new(),
            markers: Mutex::new(MarkerState {
                shared_capacity: 0,
                shared: SmallVec::new(),
                exclusive: None,
            }),
            slot_limit,
        }
    }

    /// The sequenced lock guarding this resource.
    #[inline]
    pub fn lock(&self) -> &SeqMutex {
        &self.lock
    }

    /// Ensure capacity for `n` further shared markers.
    ///
    /// Capacity-ensure semantics: calling again with the same `n` after a
    /// wound-wait retry is a no-op, not an accumulation. Caller must hold
    /// the lock.
    pub fn reserve_shared_slots(&self, n: usize) -> Result<(), SlotsExhausted> {
        let mut markers = self.markers.lock();
        let needed = markers.shared.len() + n;
        if needed > self.slot_limit {
            return Err(SlotsExhausted {
                requested: n,
                limit: self.slot_limit,
            });
        }
        if needed > markers.shared_capacity {
            markers.shared_capacity = needed;
        }
        Ok(())
    }

    /// Record a completion marker. Caller must hold the lock; shared
    /// attachment consumes one preallocated slot.
    pub fn attach_marker(&self, kind: MarkerKind, fence: Fence) {
        let mut markers = self.markers.lock();
        match kind {
            MarkerKind::Shared => {
                debug_assert!(
                    markers.shared.len() < markers.shared_capacity,
                    "shared marker attached without a reserved slot"
                );
                markers.shared.push(fence);
            }
            MarkerKind::Exclusive => {
                markers.shared.clear();
                markers.shared_capacity = 0;
                markers.exclusive = Some(fence);
            }
        }
    }

    /// Snapshot of the shared markers currently attached.
    #[must_use]
    pub fn shared_markers(&self) -> Vec<Fence> {
        self.markers.lock().shared.to_vec()
    }

    /// The exclusive marker, if one is attached.
    #[must_use]
    pub fn exclusive_marker(&self) -> Option<Fence> {
        self.markers.lock().exclusive
    }
}

impl Default for ResvObject {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// A unit of exclusive ownership, owned by some external subsystem.
///
/// The protocol only ever acquires and releases access through the embedded
/// [`ResvObject`]; it never creates or destroys resources.
#[derive(Debug)]
pub struct Resource {
    id: ResourceId,
    resv: ResvObject,
}

impl Resource {
    #[must_use]
    pub fn new() -> Self {
        Self::with_resv(ResvObject::new())
    }

    #[must_use]
    pub fn with_slot_limit(slot_limit: usize) -> Self {
        Self::with_resv(ResvObject::with_slot_limit(slot_limit))
    }

    fn with_resv(resv: ResvObject) -> Self {
        Self {
            id: ResourceId(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)),
            resv,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[inline]
    pub fn resv(&self) -> &ResvObject {
        &self.resv
    }
}

impl Default for Resource {
    fn default() -> Self {
        Self::new()
    }
}
