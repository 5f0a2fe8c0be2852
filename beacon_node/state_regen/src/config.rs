use serde_derive::{Deserialize, Serialize};

pub const DEFAULT_MAX_HOT_STATES: usize = 32;
pub const DEFAULT_MAX_CHECKPOINT_STATES: usize = 32;
pub const DEFAULT_CHECKPOINT_RETENTION_EPOCHS: u64 = 2;
pub const DEFAULT_CPU_OFFLOAD_THRESHOLD_SLOTS: u64 = 32;

/// Regeneration configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenConfig {
    /// Maximum number of states held by the hot state cache.
    pub max_hot_states: usize,
    /// Maximum number of epoch-boundary states held by the checkpoint cache.
    pub max_checkpoint_states: usize,
    /// Checkpoint entries more than this many epochs below the finalized
    /// epoch are pruned.
    pub checkpoint_retention_epochs: u64,
    /// Slot advances covering more than this many slots run on the offload
    /// pool rather than the calling thread.
    pub cpu_offload_threshold_slots: u64,
}

impl Default for RegenConfig {
    fn default() -> Self {
        Self {
            max_hot_states: DEFAULT_MAX_HOT_STATES,
            max_checkpoint_states: DEFAULT_MAX_CHECKPOINT_STATES,
            checkpoint_retention_epochs: DEFAULT_CHECKPOINT_RETENTION_EPOCHS,
            cpu_offload_threshold_slots: DEFAULT_CPU_OFFLOAD_THRESHOLD_SLOTS,
        }
    }
}
