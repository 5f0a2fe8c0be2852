//! State regeneration for the beacon node.
//!
//! Answers queries of the form "the state valid for block `B` at slot `S`" by
//! combining an in-memory cache of recent states, a cache of epoch-boundary
//! states, and replay through the state-transition engine. Concurrent callers
//! requesting the same state coalesce onto a single computation.
//!
//! The subsystem's collaborators are reached through three seams defined
//! here: [`BlockSource`] (fork choice and the block database),
//! [`StateSource`] (the persistent state store) and [`Transitioner`] (the
//! transition engine). Production wiring uses [`DefaultTransitioner`];
//! tests use the in-memory implementations from [`test_utils`].

pub mod checkpoint_state_cache;
pub mod coalescer;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod offload;
pub mod regenerator;
pub mod state_cache;
pub mod test_utils;

pub use coalescer::CancelSignal;
pub use config::RegenConfig;
pub use errors::RegenError;
pub use regenerator::StateRegenerator;

use state_processing::{
    complete_state_advance, per_block_processing, BlockProcessingError, StateAdvanceError,
    VerifyStateRoot,
};
use std::sync::Arc;
use types::{BeaconBlock, BeaconState, BeaconStateError, Epoch, EthSpec, Hash256, Slot};

/// A state together with its root, ready for use.
///
/// Conceptually immutable: mutation happens by cloning the inner state,
/// transitioning it and wrapping the result in a fresh `CachedState`.
/// Ownership of the (potentially very large) state is shared between the
/// caches and all in-flight callers; the last holder to drop releases it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedState<E: EthSpec> {
    pub state_root: Hash256,
    pub state: Arc<BeaconState<E>>,
}

impl<E: EthSpec> CachedState<E> {
    /// Wrap a state whose root is already known. The root is trusted.
    pub fn new(state_root: Hash256, state: Arc<BeaconState<E>>) -> Self {
        CachedState { state_root, state }
    }

    /// Wrap a state, computing its canonical root.
    pub fn from_state(state: BeaconState<E>) -> Self {
        CachedState {
            state_root: state.canonical_root(),
            state: Arc::new(state),
        }
    }

    pub fn slot(&self) -> Slot {
        self.state.slot
    }
}

/// The finalized frontier as seen by fork choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FinalizedAnchor {
    pub epoch: Epoch,
    pub block_root: Hash256,
    pub slot: Slot,
}

/// Lazy walk over a chain of ancestors, most recent first.
pub type AncestorBlocksIter<'a> =
    Box<dyn Iterator<Item = Result<(Hash256, BeaconBlock), RegenError>> + 'a>;

/// Read-only view over fork choice and the block database.
pub trait BlockSource<E: EthSpec>: Send + Sync + 'static {
    /// Returns a block currently in the non-pruned fork-choice subtree.
    fn get_block(&self, block_root: &Hash256) -> Option<BeaconBlock>;

    /// Walk parent pointers from `block_root` down to and including the first
    /// ancestor with `slot <= stop_slot`. The sequence is finite and, for a
    /// fixed finalized anchor, deterministic.
    fn ancestors(&self, block_root: Hash256, stop_slot: Slot) -> AncestorBlocksIter<'_>;

    /// The current finalized anchor.
    fn finalized(&self) -> FinalizedAnchor;
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateSourceError {
    /// The root is unknown to persistent storage.
    StateNotPersisted(Hash256),
    Database(String),
}

/// Read-only view over the persistent state store.
pub trait StateSource<E: EthSpec>: Send + Sync + 'static {
    /// Load the full state with the given root. May block on I/O.
    fn load_state(&self, state_root: &Hash256) -> Result<BeaconState<E>, StateSourceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionError {
    StateAdvance(StateAdvanceError),
    BlockProcessing(BlockProcessingError),
    BeaconState(BeaconStateError),
}

impl From<StateAdvanceError> for TransitionError {
    fn from(e: StateAdvanceError) -> TransitionError {
        TransitionError::StateAdvance(e)
    }
}

impl From<BlockProcessingError> for TransitionError {
    fn from(e: BlockProcessingError) -> TransitionError {
        TransitionError::BlockProcessing(e)
    }
}

impl From<BeaconStateError> for TransitionError {
    fn from(e: BeaconStateError) -> TransitionError {
        TransitionError::BeaconState(e)
    }
}

/// The deterministic state-transition engine.
///
/// Both operations are pure: they consume a state and return the transitioned
/// state, failing only on inconsistent inputs. Implementations must be
/// stateless so concurrent invocations on distinct states are independent.
pub trait Transitioner<E: EthSpec>: Send + Sync + 'static {
    /// Advance `state` across empty slots to `target_slot`, which must not be
    /// behind the state. A known root of the state at its current slot may be
    /// supplied to avoid a re-hash.
    fn process_slots(
        &self,
        state: BeaconState<E>,
        state_root: Option<Hash256>,
        target_slot: Slot,
    ) -> Result<BeaconState<E>, TransitionError>;

    /// Apply `block` to `state`, which must already sit at `block.slot`.
    /// Fails if the block's commitments (parent root, state root) do not
    /// match.
    fn process_block(
        &self,
        state: BeaconState<E>,
        block: &BeaconBlock,
    ) -> Result<BeaconState<E>, TransitionError>;
}

/// Production transitioner backed by the `state_processing` crate.
///
/// Returned states always carry a built committee cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransitioner;

impl<E: EthSpec> Transitioner<E> for DefaultTransitioner {
    fn process_slots(
        &self,
        mut state: BeaconState<E>,
        state_root: Option<Hash256>,
        target_slot: Slot,
    ) -> Result<BeaconState<E>, TransitionError> {
        complete_state_advance(&mut state, state_root, target_slot)?;
        state.build_committee_cache()?;
        Ok(state)
    }

    fn process_block(
        &self,
        mut state: BeaconState<E>,
        block: &BeaconBlock,
    ) -> Result<BeaconState<E>, TransitionError> {
        per_block_processing(&mut state, block, VerifyStateRoot::True)?;
        state.build_committee_cache()?;
        Ok(state)
    }
}

/// Bundle of the concrete collaborator types behind a regenerator instance.
pub trait RegenTypes: Send + Sync + 'static {
    type EthSpec: EthSpec;
    type BlockSource: BlockSource<Self::EthSpec>;
    type StateSource: StateSource<Self::EthSpec>;
    type Transitioner: Transitioner<Self::EthSpec>;
}
