use crate::per_slot_processing::{per_slot_processing, SlotProcessingError};
use types::{BeaconState, EthSpec, Hash256, Slot};

#[derive(Debug, Clone, PartialEq)]
pub enum StateAdvanceError {
    /// The target slot is behind the state.
    BadTargetSlot { target_slot: Slot, state_slot: Slot },
    SlotProcessing(SlotProcessingError),
}

impl From<SlotProcessingError> for StateAdvanceError {
    fn from(e: SlotProcessingError) -> StateAdvanceError {
        StateAdvanceError::SlotProcessing(e)
    }
}

/// Advance `state` to `target_slot`, processing every intervening slot.
///
/// A known root of the state at its current slot may be supplied as
/// `state_root`; it is only used for the first slot, later roots have to be
/// computed as part of the advance.
pub fn complete_state_advance<E: EthSpec>(
    state: &mut BeaconState<E>,
    mut state_root: Option<Hash256>,
    target_slot: Slot,
) -> Result<(), StateAdvanceError> {
    if target_slot < state.slot {
        return Err(StateAdvanceError::BadTargetSlot {
            target_slot,
            state_slot: state.slot,
        });
    }

    while state.slot < target_slot {
        per_slot_processing(state, state_root.take())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{Epoch, MinimalEthSpec, Validator};

    type E = MinimalEthSpec;

    fn test_state() -> BeaconState<E> {
        let validators = (0..8)
            .map(|_| Validator {
                effective_balance: 32_000_000_000,
                activation_epoch: Epoch::new(0),
                exit_epoch: Epoch::new(u64::MAX),
            })
            .collect();

        BeaconState::genesis(Hash256::repeat_byte(3), validators)
    }

    #[test]
    fn advances_across_epochs() {
        let mut state = test_state();
        let target = Slot::new(E::slots_per_epoch() * 2 + 3);

        complete_state_advance(&mut state, None, target).unwrap();

        assert_eq!(state.slot, target);
    }

    #[test]
    fn zero_distance_is_a_no_op() {
        let mut state = test_state();
        let root = state.canonical_root();
        let slot = state.slot;

        complete_state_advance(&mut state, Some(root), slot).unwrap();

        assert_eq!(state.canonical_root(), root);
    }

    #[test]
    fn rejects_backwards_target() {
        let mut state = test_state();
        complete_state_advance(&mut state, None, Slot::new(5)).unwrap();

        assert_eq!(
            complete_state_advance(&mut state, None, Slot::new(4)),
            Err(StateAdvanceError::BadTargetSlot {
                target_slot: Slot::new(4),
                state_slot: Slot::new(5),
            })
        );
    }
}
