use crate::{BeaconState, BeaconStateError, Epoch, EthSpec, Hash256, Slot};
use ssz::Encode;
use tree_hash::merkle_root;

/// Precomputed validator shuffling for a single epoch.
///
/// Built once per epoch crossing and carried inside the state, excluded from
/// serialization and hashing. A default cache is uninitialized and must be
/// rebuilt before committees can be read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitteeCache {
    initialized_epoch: Option<Epoch>,
    shuffling: Vec<usize>,
    total_active_balance: u64,
    slots_per_epoch: u64,
}

impl CommitteeCache {
    /// Compute the shuffling for `epoch`, which must be the state's current epoch.
    pub fn initialized<E: EthSpec>(
        state: &BeaconState<E>,
        epoch: Epoch,
    ) -> Result<CommitteeCache, BeaconStateError> {
        let active = state.active_validator_indices(epoch);

        if active.is_empty() {
            return Err(BeaconStateError::InsufficientValidators);
        }

        let total_active_balance = active
            .iter()
            .map(|&i| state.validators[i].effective_balance)
            .sum();

        Ok(CommitteeCache {
            initialized_epoch: Some(epoch),
            shuffling: shuffle_indices(active, state.shuffling_seed(epoch)),
            total_active_balance,
            slots_per_epoch: E::slots_per_epoch(),
        })
    }

    pub fn is_initialized_at(&self, epoch: Epoch) -> bool {
        self.initialized_epoch == Some(epoch)
    }

    pub fn initialized_epoch(&self) -> Option<Epoch> {
        self.initialized_epoch
    }

    pub fn active_validator_count(&self) -> usize {
        self.shuffling.len()
    }

    pub fn total_active_balance(&self) -> u64 {
        self.total_active_balance
    }

    /// The committee attesting at `slot`, or `None` if the cache is uninitialized.
    ///
    /// Every active validator attests once per epoch, so the shuffling is
    /// split into one committee per slot.
    pub fn committee(&self, slot: Slot) -> Option<&[usize]> {
        self.initialized_epoch?;

        let committee_size =
            (self.shuffling.len() as u64).div_ceil(self.slots_per_epoch) as usize;
        let position = (slot % self.slots_per_epoch) as usize;

        self.shuffling
            .chunks(committee_size)
            .nth(position)
            .or(Some(&[]))
    }
}

/// Deterministic, seed-keyed permutation of `indices`.
///
/// This orders indices by a per-index hash of the seed. It is not the
/// swap-or-not network shuffle; the subsystem only requires that the
/// permutation is a pure function of `(indices, seed)`.
fn shuffle_indices(mut indices: Vec<usize>, seed: Hash256) -> Vec<usize> {
    indices.sort_by_key(|&index| shuffle_rank(seed, index));
    indices
}

fn shuffle_rank(seed: Hash256, index: usize) -> u64 {
    let mut preimage = seed.as_bytes().to_vec();
    (index as u64).ssz_append(&mut preimage);

    let digest = merkle_root(&preimage, 0);
    u64::from_le_bytes(
        digest.as_bytes()[..8]
            .try_into()
            .expect("digest is at least eight bytes"),
    )
}
