pub use metrics::*;
use std::sync::LazyLock;

pub static STATE_CACHE_HITS: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_state_cache_hits_total",
        "Count of hot state cache hits",
    )
});
pub static STATE_CACHE_MISSES: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_state_cache_misses_total",
        "Count of hot state cache misses",
    )
});
pub static CHECKPOINT_CACHE_HITS: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_checkpoint_cache_hits_total",
        "Count of checkpoint state cache hits",
    )
});
pub static CHECKPOINT_CACHE_MISSES: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_checkpoint_cache_misses_total",
        "Count of checkpoint state cache misses",
    )
});
pub static STATE_LOAD_TIMES: LazyLock<Result<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "regen_state_load_seconds",
        "Time spent loading states from the persistent store",
    )
});
pub static SLOT_ADVANCE_TIMES: LazyLock<Result<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "regen_slot_advance_seconds",
        "Time spent advancing states across empty slots",
    )
});
pub static REPLAYED_BLOCKS: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_replayed_blocks_total",
        "Count of blocks re-applied during pre-state regeneration",
    )
});
pub static DONATED_STATES: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_donated_states_total",
        "Count of states accepted from the block processor",
    )
});
pub static DONATED_STATES_REJECTED: LazyLock<Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "regen_donated_states_rejected_total",
        "Count of donated states that failed the consistency check",
    )
});
