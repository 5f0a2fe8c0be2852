use crate::per_epoch_processing::per_epoch_processing;
use types::{BeaconState, BeaconStateError, EthSpec, Hash256};

#[derive(Debug, Clone, PartialEq)]
pub enum SlotProcessingError {
    BeaconStateError(BeaconStateError),
}

impl From<BeaconStateError> for SlotProcessingError {
    fn from(e: BeaconStateError) -> SlotProcessingError {
        SlotProcessingError::BeaconStateError(e)
    }
}

/// Advance `state` across a single slot, running epoch processing when the new
/// slot is the first of an epoch.
///
/// If the root of the state at its current slot is already known it may be
/// supplied as `state_root`, avoiding a re-hash.
pub fn per_slot_processing<E: EthSpec>(
    state: &mut BeaconState<E>,
    state_root: Option<Hash256>,
) -> Result<(), SlotProcessingError> {
    let previous_state_root = state_root.unwrap_or_else(|| state.canonical_root());

    // Complete the latest block header: the state root of the slot a block
    // was applied in only becomes known here, one slot later.
    if state.latest_block_header.state_root.is_zero() {
        state.latest_block_header.state_root = previous_state_root;
    }

    state.slot += 1;

    if state.slot.is_epoch_boundary(E::slots_per_epoch()) {
        per_epoch_processing(state)?;
    }

    Ok(())
}
