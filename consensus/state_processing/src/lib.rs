//! The deterministic state-transition engine.
//!
//! Three entry points, mirroring the protocol's structure:
//!
//! - `per_slot_processing`: advance a state across a single empty slot,
//!   running epoch processing when a boundary is crossed.
//! - `complete_state_advance`: repeated slot processing up to a target slot.
//! - `per_block_processing`: apply one block to a state already advanced to
//!   the block's slot.
//!
//! All functions are pure with respect to their inputs and never perform I/O.

pub mod per_block_processing;
pub mod per_epoch_processing;
pub mod per_slot_processing;
pub mod state_advance;

pub use per_block_processing::{per_block_processing, BlockProcessingError, VerifyStateRoot};
pub use per_epoch_processing::per_epoch_processing;
pub use per_slot_processing::{per_slot_processing, SlotProcessingError};
pub use state_advance::{complete_state_advance, StateAdvanceError};
