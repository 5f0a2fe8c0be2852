use crate::coalescer::CoalesceError;
use crate::{StateSourceError, TransitionError};
use types::{Epoch, Hash256, Slot};

#[derive(Debug, Clone, PartialEq)]
pub enum RegenError {
    /// Fork choice has no such block: it was pruned or never seen.
    UnknownBlock(Hash256),
    /// The requested slot is below the block's slot.
    InvalidSlot {
        block_slot: Slot,
        requested_slot: Slot,
    },
    /// The root is unknown to persistent storage and not reachable by replay.
    StateNotAvailable(Hash256),
    /// Deterministic failure from the transitioner; the inputs are
    /// inconsistent and nothing was cached.
    Transition(TransitionError),
    /// The caller's cancellation signal fired. The underlying computation may
    /// still complete for other callers.
    Cancelled,
    /// The coalesced computation this caller was awaiting disappeared without
    /// a result. Retrying recomputes from scratch.
    ReplayAbandoned,
    Database(String),
    /// A state inserted under a checkpoint key did not sit on that epoch's
    /// boundary slot.
    UnalignedCheckpointState { epoch: Epoch, slot: Slot },
    ZeroCacheSize,
    WorkerSpawn(String),
}

impl From<TransitionError> for RegenError {
    fn from(e: TransitionError) -> RegenError {
        RegenError::Transition(e)
    }
}

impl From<StateSourceError> for RegenError {
    fn from(e: StateSourceError) -> RegenError {
        match e {
            StateSourceError::StateNotPersisted(root) => RegenError::StateNotAvailable(root),
            StateSourceError::Database(message) => RegenError::Database(message),
        }
    }
}

impl From<CoalesceError> for RegenError {
    fn from(e: CoalesceError) -> RegenError {
        match e {
            CoalesceError::Cancelled => RegenError::Cancelled,
            CoalesceError::Abandoned => RegenError::ReplayAbandoned,
        }
    }
}
