use crate::{Hash256, Slot};
use serde_derive::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

/// The header view of a beacon block.
///
/// The regeneration subsystem never inspects a block beyond these fields; the
/// body is represented only by its root. A block's identity is its tree-hash
/// root, with `state_root` referring to the post-state of applying the block.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Encode, Decode, TreeHash,
)]
pub struct BeaconBlock {
    pub slot: Slot,
    pub proposer_index: u64,
    pub parent_root: Hash256,
    pub state_root: Hash256,
    pub body_root: Hash256,
}

impl BeaconBlock {
    /// Returns the tree-hash root of the block.
    pub fn canonical_root(&self) -> Hash256 {
        self.tree_hash_root()
    }

    /// Returns `self` with the state root zeroed out.
    ///
    /// This is the form a block takes as a state's `latest_block_header`: the
    /// state root is unknown at the point the header is installed and is only
    /// filled in by slot processing at the start of the following slot.
    pub fn temporary_header(&self) -> BeaconBlock {
        BeaconBlock {
            state_root: Hash256::zero(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_commits_to_state_root() {
        let block = BeaconBlock {
            slot: Slot::new(1),
            proposer_index: 0,
            parent_root: Hash256::repeat_byte(1),
            state_root: Hash256::repeat_byte(2),
            body_root: Hash256::repeat_byte(3),
        };

        assert_ne!(
            block.canonical_root(),
            block.temporary_header().canonical_root()
        );
    }
}
