//! Error taxonomy for batch reservation.
//!
//! Contention is never surfaced: it is resolved internally by the
//! wound-wait retry loop. Every error below is terminal for the batch and
//! is only reported after the batch has been fully unwound — the caller
//! never receives a partially held reservation.

use thiserror::Error;

use crate::resv::ResourceId;

/// Terminal failure of a batch reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReserveError {
    /// A cancellable wait observed its cancellation token. Retry at a
    /// higher level if at all; nothing is held.
    #[error("batch reservation cancelled while waiting on {resource}")]
    Cancelled { resource: ResourceId },

    /// Shared-marker slot preallocation hit the per-resource quota.
    /// Waiting cannot fix exhaustion, so this is terminal rather than a
    /// retry through the contention path.
    #[error("{resource}: shared marker slots exhausted ({requested} requested, limit {limit})")]
    Exhausted {
        resource: ResourceId,
        requested: usize,
        limit: usize,
    },

    /// The same resource appeared twice in one batch and the caller
    /// supplied no duplicates output to divert the second entry into.
    #[error("{0} listed twice in batch with no duplicates output")]
    DuplicateEntry(ResourceId),
}
