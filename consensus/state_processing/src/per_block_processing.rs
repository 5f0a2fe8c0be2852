use ssz::Encode;
use tree_hash::merkle_root;
use types::{BeaconBlock, BeaconState, BeaconStateError, EthSpec, Hash256, Slot};

/// Flat reward credited to the proposer of every applied block.
pub const PROPOSER_REWARD_GWEI: u64 = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub enum BlockProcessingError {
    /// The state has not been advanced to the block's slot.
    StateSlotMismatch { state_slot: Slot, block_slot: Slot },
    /// The block does not build on the state's latest block header.
    ParentBlockRootMismatch { state: Hash256, block: Hash256 },
    /// The block commits to a different post-state than the one computed.
    StateRootMismatch { expected: Hash256, local: Hash256 },
    BeaconStateError(BeaconStateError),
}

impl From<BeaconStateError> for BlockProcessingError {
    fn from(e: BeaconStateError) -> BlockProcessingError {
        BlockProcessingError::BeaconStateError(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerifyStateRoot {
    True,
    False,
}

/// Apply `block` to `state`.
///
/// `state` must already sit at `block.slot` (prior slot processing included).
/// With `VerifyStateRoot::True` the block's `state_root` commitment is checked
/// against the computed post-state; replayed blocks are known-good and their
/// commitments must match, so a mismatch indicates inconsistent inputs.
pub fn per_block_processing<E: EthSpec>(
    state: &mut BeaconState<E>,
    block: &BeaconBlock,
    verify_state_root: VerifyStateRoot,
) -> Result<(), BlockProcessingError> {
    if state.slot != block.slot {
        return Err(BlockProcessingError::StateSlotMismatch {
            state_slot: state.slot,
            block_slot: block.slot,
        });
    }

    let expected_parent = state.latest_block_header.canonical_root();
    if block.parent_root != expected_parent {
        return Err(BlockProcessingError::ParentBlockRootMismatch {
            state: expected_parent,
            block: block.parent_root,
        });
    }

    state.latest_block_header = block.temporary_header();

    // Mix the block body into the seed, standing in for the randao reveal.
    let mut preimage = state.seed.as_bytes().to_vec();
    block.body_root.ssz_append(&mut preimage);
    state.seed = merkle_root(&preimage, 0);

    state.increase_balance(block.proposer_index as usize, PROPOSER_REWARD_GWEI)?;

    if verify_state_root == VerifyStateRoot::True {
        let local = state.canonical_root();
        if block.state_root != local {
            return Err(BlockProcessingError::StateRootMismatch {
                expected: block.state_root,
                local,
            });
        }
    }

    Ok(())
}
