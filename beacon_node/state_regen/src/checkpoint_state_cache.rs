use crate::errors::RegenError;
use crate::CachedState;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use types::{Checkpoint, Epoch, EthSpec};

/// In-memory cache of epoch-boundary states, keyed by `(epoch, block_root)`.
///
/// Every cached state sits exactly on the first slot of its checkpoint's
/// epoch; `put` refuses anything else. When full, the entry with the smallest
/// epoch is evicted first, ties broken by least-recent use — old checkpoints
/// lose their value as finalization approaches them, recent ones anchor
/// pre-state replay.
#[derive(Debug)]
pub struct CheckpointStateCache<E: EthSpec> {
    capacity: NonZeroUsize,
    /// Monotonic logical clock for LRU tie-breaking.
    tick: u64,
    entries: HashMap<Checkpoint, Entry<E>>,
}

#[derive(Debug)]
struct Entry<E: EthSpec> {
    state: CachedState<E>,
    last_used: u64,
}

impl<E: EthSpec> CheckpointStateCache<E> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        CheckpointStateCache {
            capacity,
            tick: 0,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch the state for `checkpoint`, marking it as most recently used.
    pub fn get(&mut self, checkpoint: &Checkpoint) -> Option<CachedState<E>> {
        self.tick += 1;
        let tick = self.tick;

        self.entries.get_mut(checkpoint).map(|entry| {
            entry.last_used = tick;
            entry.state.clone()
        })
    }

    /// Insert a fully materialized epoch-boundary state.
    pub fn put(&mut self, checkpoint: Checkpoint, state: CachedState<E>) -> Result<(), RegenError> {
        let boundary_slot = checkpoint.epoch.start_slot(E::slots_per_epoch());
        if state.slot() != boundary_slot {
            return Err(RegenError::UnalignedCheckpointState {
                epoch: checkpoint.epoch,
                slot: state.slot(),
            });
        }

        if self.entries.len() >= self.capacity.get() && !self.entries.contains_key(&checkpoint) {
            self.evict_one();
        }

        self.tick += 1;
        self.entries.insert(
            checkpoint,
            Entry {
                state,
                last_used: self.tick,
            },
        );

        Ok(())
    }

    /// Remove all entries more than `retention_epochs` epochs below `finalized_epoch`.
    pub fn prune_finalized(&mut self, finalized_epoch: Epoch, retention_epochs: u64) {
        let cutoff = finalized_epoch - retention_epochs;
        self.entries
            .retain(|checkpoint, _| checkpoint.epoch >= cutoff);
    }

    fn evict_one(&mut self) {
        // O(n) scan; the cache is bounded to a few dozen entries.
        let victim = self
            .entries
            .iter()
            .min_by_key(|(checkpoint, entry)| (checkpoint.epoch, entry.last_used))
            .map(|(checkpoint, _)| *checkpoint);

        if let Some(checkpoint) = victim {
            self.entries.remove(&checkpoint);
        }
    }
}
