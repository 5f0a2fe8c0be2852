use crate::{BeaconBlock, CommitteeCache, Epoch, EthSpec, Hash256, Slot};
use safe_arith::ArithError;
use serde_derive::{Deserialize, Serialize};
use ssz::Encode;
use ssz_derive::{Decode, Encode};
use std::marker::PhantomData;
use tree_hash::merkle_root;

#[derive(Debug, Clone, PartialEq)]
pub enum BeaconStateError {
    /// A committee read was attempted before the cache for that epoch was built.
    CommitteeCacheUninitialized(Epoch),
    InsufficientValidators,
    UnknownValidator(usize),
    ArithError(ArithError),
}

impl From<ArithError> for BeaconStateError {
    fn from(e: ArithError) -> BeaconStateError {
        BeaconStateError::ArithError(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Validator {
    pub effective_balance: u64,
    pub activation_epoch: Epoch,
    pub exit_epoch: Epoch,
}

impl Validator {
    pub fn is_active_at(&self, epoch: Epoch) -> bool {
        self.activation_epoch <= epoch && epoch < self.exit_epoch
    }
}

/// The state of the beacon chain at a single slot.
///
/// `latest_block_header` follows the protocol convention: its `state_root` is
/// zeroed when a block is applied and only filled in with the pre-slot state
/// root by the next slot's processing. The block root of the most recently
/// applied block is therefore recoverable from a post-block state by
/// completing the header with that state's own canonical root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(bound = "E: EthSpec")]
pub struct BeaconState<E: EthSpec> {
    pub slot: Slot,
    pub latest_block_header: BeaconBlock,
    /// Per-epoch randomness for the shuffling, rotated at epoch boundaries.
    pub seed: Hash256,
    pub validators: Vec<Validator>,
    pub balances: Vec<u64>,

    #[serde(skip)]
    #[ssz(skip_serializing, skip_deserializing)]
    pub committee_cache: CommitteeCache,

    #[serde(skip)]
    #[ssz(skip_serializing, skip_deserializing)]
    _phantom: PhantomData<E>,
}

impl<E: EthSpec> BeaconState<E> {
    /// A state at the genesis slot, before any block has been applied.
    pub fn genesis(genesis_seed: Hash256, validators: Vec<Validator>) -> Self {
        let balances = validators.iter().map(|v| v.effective_balance).collect();

        BeaconState {
            slot: Slot::new(0),
            latest_block_header: BeaconBlock::default(),
            seed: genesis_seed,
            validators,
            balances,
            committee_cache: CommitteeCache::default(),
            _phantom: PhantomData,
        }
    }

    /// The epoch corresponding to `self.slot`.
    pub fn current_epoch(&self) -> Epoch {
        self.slot.epoch(E::slots_per_epoch())
    }

    /// The canonical identity of this state: a Merkle root over its
    /// serialized form. Caches are excluded from serialization and therefore
    /// do not affect the root.
    pub fn canonical_root(&self) -> Hash256 {
        merkle_root(&self.as_ssz_bytes(), 0)
    }

    /// The shuffling seed for `epoch`.
    pub fn shuffling_seed(&self, epoch: Epoch) -> Hash256 {
        let mut preimage = self.seed.as_bytes().to_vec();
        epoch.ssz_append(&mut preimage);
        merkle_root(&preimage, 0)
    }

    /// Indices of all validators active at `epoch`, in registry order.
    pub fn active_validator_indices(&self, epoch: Epoch) -> Vec<usize> {
        self.validators
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_active_at(epoch))
            .map(|(i, _)| i)
            .collect()
    }

    /// Build the committee cache for the current epoch, if it is not already built.
    pub fn build_committee_cache(&mut self) -> Result<(), BeaconStateError> {
        let epoch = self.current_epoch();

        if !self.committee_cache.is_initialized_at(epoch) {
            self.committee_cache = CommitteeCache::initialized(self, epoch)?;
        }

        Ok(())
    }

    /// The committee cache for the current epoch.
    pub fn committee_cache(&self) -> Result<&CommitteeCache, BeaconStateError> {
        let epoch = self.current_epoch();

        if self.committee_cache.is_initialized_at(epoch) {
            Ok(&self.committee_cache)
        } else {
            Err(BeaconStateError::CommitteeCacheUninitialized(epoch))
        }
    }

    /// Sum of effective balances of the validators active in the current epoch.
    pub fn total_active_balance(&self) -> Result<u64, BeaconStateError> {
        Ok(self.committee_cache()?.total_active_balance())
    }

    /// Credit `amount` Gwei to the validator at `index`.
    pub fn increase_balance(&mut self, index: usize, amount: u64) -> Result<(), BeaconStateError> {
        let balance = self
            .balances
            .get_mut(index)
            .ok_or(BeaconStateError::UnknownValidator(index))?;
        *balance = balance.saturating_add(amount);
        Ok(())
    }
}
