//! Types used across the beacon node for state regeneration and replay.
//!
//! This crate carries the subset of consensus types the state regenerator and
//! the transition engine observe: slots and epochs, checkpoints, the header
//! view of a block and a beacon state with its precomputed committee cache.

pub mod beacon_block;
pub mod beacon_state;
pub mod checkpoint;
pub mod committee_cache;
pub mod eth_spec;
pub mod slot_epoch;

pub use beacon_block::BeaconBlock;
pub use beacon_state::{BeaconState, BeaconStateError, Validator};
pub use checkpoint::Checkpoint;
pub use committee_cache::CommitteeCache;
pub use eth_spec::{EthSpec, MainnetEthSpec, MinimalEthSpec};
pub use slot_epoch::{Epoch, Slot};

pub use ethereum_types::H256 as Hash256;
