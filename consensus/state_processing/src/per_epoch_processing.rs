use types::{BeaconState, BeaconStateError, EthSpec};

/// Epoch processing, run when a state first enters a new epoch: rotate the
/// shuffling seed and rebuild the committee cache for the new epoch.
pub fn per_epoch_processing<E: EthSpec>(
    state: &mut BeaconState<E>,
) -> Result<(), BeaconStateError> {
    let epoch = state.current_epoch();

    state.seed = state.shuffling_seed(epoch);
    state.build_committee_cache()?;

    Ok(())
}
