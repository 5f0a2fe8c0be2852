use std::fmt::Debug;

/// Compile-time preset for chain constants.
///
/// Only the constants the regeneration subsystem depends on are carried here;
/// in particular there are no SSZ list maxima.
pub trait EthSpec: 'static + Default + Sync + Send + Clone + Debug + PartialEq + Eq {
    /// The number of slots in each epoch.
    fn slots_per_epoch() -> u64;
}

/// Ethereum Foundation specifications.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct MainnetEthSpec;

impl EthSpec for MainnetEthSpec {
    fn slots_per_epoch() -> u64 {
        32
    }
}

/// Ethereum Foundation minimal spec, as defined in the eth2.0-specs repo. Used for testing.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct MinimalEthSpec;

impl EthSpec for MinimalEthSpec {
    fn slots_per_epoch() -> u64 {
        8
    }
}
