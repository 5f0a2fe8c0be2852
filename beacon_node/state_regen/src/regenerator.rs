use crate::checkpoint_state_cache::CheckpointStateCache;
use crate::coalescer::{Admission, CancelSignal, WorkRegistry};
use crate::config::RegenConfig;
use crate::errors::RegenError;
use crate::metrics;
use crate::offload::OffloadPool;
use crate::state_cache::StateCache;
use crate::{
    BlockSource, CachedState, FinalizedAnchor, RegenTypes, StateSource, StateSourceError,
    TransitionError, Transitioner,
};
use parking_lot::{Mutex, RwLock};
use slog::{debug, warn, Logger};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use types::{BeaconBlock, BeaconState, Checkpoint, Epoch, EthSpec, Hash256, Slot};

/// Upper bound on distinct queries computing at once. Joining an in-flight
/// query is always admitted; arrivals for new keys beyond this block until a
/// slot frees up.
const MAX_INFLIGHT_QUERIES: usize = 64;

/// Key under which concurrent queries coalesce. The three namespaces are
/// disjoint by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// `get_state`.
    State(Hash256),
    /// `get_block_slot_state`.
    BlockSlot(Hash256, Slot),
    /// `get_checkpoint_state`.
    Checkpoint(Checkpoint),
}

/// Reconstructs beacon states on demand.
///
/// The four public queries consult the caches first and otherwise replay from
/// the cheapest available anchor, coalescing concurrent callers per
/// [`QueryKey`]. Cache mutation happens in short critical sections; all
/// transition work runs outside any lock.
pub struct StateRegenerator<T: RegenTypes> {
    block_source: Arc<T::BlockSource>,
    state_source: Arc<T::StateSource>,
    transitioner: Arc<T::Transitioner>,
    state_cache: Mutex<StateCache<T::EthSpec>>,
    checkpoint_cache: Mutex<CheckpointStateCache<T::EthSpec>>,
    work: WorkRegistry<QueryKey, Result<CachedState<T::EthSpec>, RegenError>>,
    offload: OffloadPool,
    finalized: RwLock<FinalizedAnchor>,
    /// State roots the block processor wants retained when pre-state replay
    /// produces them; consumed on use.
    watched_roots: Mutex<HashSet<Hash256>>,
    config: RegenConfig,
    log: Logger,
}

impl<T: RegenTypes> StateRegenerator<T> {
    pub fn new(
        block_source: Arc<T::BlockSource>,
        state_source: Arc<T::StateSource>,
        transitioner: Arc<T::Transitioner>,
        config: RegenConfig,
        log: Logger,
    ) -> Result<Self, RegenError> {
        let hot_capacity =
            NonZeroUsize::new(config.max_hot_states).ok_or(RegenError::ZeroCacheSize)?;
        let checkpoint_capacity =
            NonZeroUsize::new(config.max_checkpoint_states).ok_or(RegenError::ZeroCacheSize)?;

        let offload = OffloadPool::new(num_cpus::get())
            .map_err(|e| RegenError::WorkerSpawn(e.to_string()))?;

        let finalized = block_source.finalized();

        Ok(StateRegenerator {
            block_source,
            state_source,
            transitioner,
            state_cache: Mutex::new(StateCache::new(hot_capacity)),
            checkpoint_cache: Mutex::new(CheckpointStateCache::new(checkpoint_capacity)),
            work: WorkRegistry::new(MAX_INFLIGHT_QUERIES),
            offload,
            finalized: RwLock::new(finalized),
            watched_roots: Mutex::new(HashSet::new()),
            config,
            log,
        })
    }

    /// The state with the given root, from the hot cache or cold storage.
    pub fn get_state(
        &self,
        state_root: Hash256,
        cancel: &CancelSignal,
    ) -> Result<CachedState<T::EthSpec>, RegenError> {
        self.get_state_admitted(state_root, cancel, Admission::Bounded)
    }

    fn get_state_admitted(
        &self,
        state_root: Hash256,
        cancel: &CancelSignal,
        admission: Admission,
    ) -> Result<CachedState<T::EthSpec>, RegenError> {
        if let Some(state) = self.state_cache.lock().get(&state_root) {
            metrics::inc_counter(&metrics::STATE_CACHE_HITS);
            return Ok(state);
        }
        metrics::inc_counter(&metrics::STATE_CACHE_MISSES);

        self.coalesce(QueryKey::State(state_root), cancel, admission, |regen| {
            regen.load_state_worker(state_root)
        })
    }

    /// The state rooted at `block_root` advanced through empty slots to
    /// `slot`.
    ///
    /// The result is transient and not hot-cached, but lands in the
    /// checkpoint cache whenever `slot` is an epoch boundary.
    pub fn get_block_slot_state(
        &self,
        block_root: Hash256,
        slot: Slot,
        cancel: &CancelSignal,
    ) -> Result<CachedState<T::EthSpec>, RegenError> {
        self.get_block_slot_state_admitted(block_root, slot, cancel, Admission::Bounded)
    }

    fn get_block_slot_state_admitted(
        &self,
        block_root: Hash256,
        slot: Slot,
        cancel: &CancelSignal,
        admission: Admission,
    ) -> Result<CachedState<T::EthSpec>, RegenError> {
        let block = self
            .block_source
            .get_block(&block_root)
            .ok_or(RegenError::UnknownBlock(block_root))?;

        if slot < block.slot {
            return Err(RegenError::InvalidSlot {
                block_slot: block.slot,
                requested_slot: slot,
            });
        }

        self.coalesce(
            QueryKey::BlockSlot(block_root, slot),
            cancel,
            admission,
            |regen| regen.block_slot_worker(&block, block_root, slot),
        )
    }

    /// The state at the first slot of `checkpoint.epoch`, rooted at
    /// `checkpoint.root`.
    pub fn get_checkpoint_state(
        &self,
        checkpoint: Checkpoint,
        cancel: &CancelSignal,
    ) -> Result<CachedState<T::EthSpec>, RegenError> {
        if let Some(state) = self.checkpoint_cache.lock().get(&checkpoint) {
            metrics::inc_counter(&metrics::CHECKPOINT_CACHE_HITS);
            return Ok(state);
        }
        metrics::inc_counter(&metrics::CHECKPOINT_CACHE_MISSES);

        self.coalesce(
            QueryKey::Checkpoint(checkpoint),
            cancel,
            Admission::Bounded,
            |regen| {
                let slot = checkpoint.epoch.start_slot(T::EthSpec::slots_per_epoch());
                let state = regen.get_block_slot_state_admitted(
                    checkpoint.root,
                    slot,
                    &CancelSignal::default(),
                    Admission::Nested,
                )?;
                regen.insert_checkpoint(checkpoint, state.clone());
                Ok(state)
            },
        )
    }

    /// A valid parent state on which `block` can be applied, anchored at the
    /// most recent viable epoch boundary to maximize cache reuse.
    pub fn get_pre_state(
        &self,
        block: &BeaconBlock,
        cancel: &CancelSignal,
    ) -> Result<CachedState<T::EthSpec>, RegenError> {
        let slots_per_epoch = T::EthSpec::slots_per_epoch();
        let parent_root = block.parent_root;

        let parent = self
            .block_source
            .get_block(&parent_root)
            .ok_or(RegenError::UnknownBlock(parent_root))?;

        if block.slot <= parent.slot {
            return Err(RegenError::InvalidSlot {
                block_slot: parent.slot,
                requested_slot: block.slot,
            });
        }

        // The latest epoch boundary at or below the block. Anchoring below
        // the finalized epoch is impossible for any block fork choice still
        // knows: the ancestor walk stays inside the non-pruned subtree or
        // fails with `UnknownBlock`.
        let target_epoch = block.slot.epoch(slots_per_epoch);
        let boundary_slot = target_epoch.start_slot(slots_per_epoch);

        let (anchor_root, anchor_slot) = self.find_anchor(parent_root, &parent, boundary_slot)?;

        let anchor_checkpoint = Checkpoint {
            epoch: target_epoch,
            root: anchor_root,
        };
        let anchor = self.get_checkpoint_state(anchor_checkpoint, cancel)?;

        if anchor_root == parent_root {
            // The parent sits at or below the boundary: the checkpoint state
            // already descends from it through empty slots alone.
            return Ok(anchor);
        }

        // Collect the blocks strictly after the anchor, oldest first.
        let mut chain = Vec::new();
        for item in self.block_source.ancestors(parent_root, anchor_slot) {
            let (root, ancestor) = item?;
            if root == anchor_root {
                break;
            }
            chain.push(ancestor);
        }
        chain.reverse();

        debug!(
            self.log,
            "Replaying blocks for pre-state";
            "block_slot" => block.slot.as_u64(),
            "anchor_epoch" => target_epoch.as_u64(),
            "blocks" => chain.len(),
        );

        self.replay_blocks(anchor, chain, cancel)
    }

    /// Record an advanced finalized anchor and prune both caches.
    ///
    /// Queries already in flight below the anchor complete, but their results
    /// are no longer inserted.
    pub fn on_finalized(&self, epoch: Epoch, block_root: Hash256, slot: Slot) {
        {
            let mut finalized = self.finalized.write();
            if epoch < finalized.epoch {
                warn!(
                    self.log,
                    "Ignoring finalized anchor moving backwards";
                    "current_epoch" => finalized.epoch.as_u64(),
                    "reported_epoch" => epoch.as_u64(),
                );
                return;
            }
            *finalized = FinalizedAnchor {
                epoch,
                block_root,
                slot,
            };
        }

        self.state_cache.lock().prune(slot);
        self.checkpoint_cache
            .lock()
            .prune_finalized(epoch, self.config.checkpoint_retention_epochs);

        debug!(
            self.log,
            "Pruned regeneration caches";
            "finalized_epoch" => epoch.as_u64(),
            "finalized_slot" => slot.as_u64(),
        );
    }

    /// Accept a state the block processor just produced, so later queries for
    /// it need no replay.
    ///
    /// Best-effort: a state that fails the consistency check — its block is
    /// unknown to fork choice, or the block commits to a different state root
    /// — is logged and dropped.
    pub fn submit_processed_state(&self, mut state: BeaconState<T::EthSpec>) {
        let slots_per_epoch = T::EthSpec::slots_per_epoch();

        if state.build_committee_cache().is_err() {
            metrics::inc_counter(&metrics::DONATED_STATES_REJECTED);
            warn!(self.log, "Rejected donated state"; "reason" => "unbuildable committee cache");
            return;
        }

        let state_root = state.canonical_root();

        // Complete the latest header with the state's own root to recover the
        // root of the block that produced this state.
        let mut header = state.latest_block_header.clone();
        if header.state_root.is_zero() {
            header.state_root = state_root;
        }
        let block_root = header.canonical_root();

        let Some(block) = self.block_source.get_block(&block_root) else {
            metrics::inc_counter(&metrics::DONATED_STATES_REJECTED);
            warn!(
                self.log,
                "Rejected donated state";
                "reason" => "block unknown to fork choice",
                "block_root" => ?block_root,
            );
            return;
        };

        if block.state_root != state_root && state.slot == block.slot {
            metrics::inc_counter(&metrics::DONATED_STATES_REJECTED);
            warn!(
                self.log,
                "Rejected donated state";
                "reason" => "state root mismatch",
                "block_root" => ?block_root,
                "state_root" => ?state_root,
            );
            return;
        }

        metrics::inc_counter(&metrics::DONATED_STATES);

        let slot = state.slot;
        let cached = CachedState::new(state_root, Arc::new(state));
        self.insert_hot(cached.clone());

        if slot.is_epoch_boundary(slots_per_epoch) {
            let checkpoint = Checkpoint {
                epoch: slot.epoch(slots_per_epoch),
                root: block_root,
            };
            self.insert_checkpoint(checkpoint, cached);
        }
    }

    /// Ask for the state with `state_root` to be retained should pre-state
    /// replay produce it.
    pub fn mark_state_root_interesting(&self, state_root: Hash256) {
        self.watched_roots.lock().insert(state_root);
    }

    pub fn state_cache_len(&self) -> usize {
        self.state_cache.lock().len()
    }

    pub fn checkpoint_cache_len(&self) -> usize {
        self.checkpoint_cache.lock().len()
    }

    fn coalesce<F>(
        &self,
        key: QueryKey,
        cancel: &CancelSignal,
        admission: Admission,
        f: F,
    ) -> Result<CachedState<T::EthSpec>, RegenError>
    where
        F: FnOnce(&Self) -> Result<CachedState<T::EthSpec>, RegenError>,
    {
        if cancel.is_cancelled() {
            return Err(RegenError::Cancelled);
        }

        self.work
            .get_or_compute(&key, cancel, admission, |_context| f(self))?
    }

    fn load_state_worker(
        &self,
        state_root: Hash256,
    ) -> Result<CachedState<T::EthSpec>, RegenError> {
        let timer = metrics::start_timer(&metrics::STATE_LOAD_TIMES);
        let loaded = self.state_source.load_state(&state_root);
        metrics::stop_timer(timer);

        match loaded {
            Ok(mut state) => {
                state
                    .build_committee_cache()
                    .map_err(TransitionError::from)?;

                let cached = CachedState::new(state_root, Arc::new(state));
                self.insert_hot(cached.clone());
                Ok(cached)
            }
            Err(StateSourceError::StateNotPersisted(root)) => {
                Err(RegenError::StateNotAvailable(root))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn block_slot_worker(
        &self,
        block: &BeaconBlock,
        block_root: Hash256,
        slot: Slot,
    ) -> Result<CachedState<T::EthSpec>, RegenError> {
        let slots_per_epoch = T::EthSpec::slots_per_epoch();

        let base =
            self.get_state_admitted(block.state_root, &CancelSignal::default(), Admission::Nested)?;

        let advanced = if slot > base.slot() {
            self.advance_slots(base, slot)?
        } else {
            base
        };

        if advanced.slot().is_epoch_boundary(slots_per_epoch) {
            let checkpoint = Checkpoint {
                epoch: advanced.slot().epoch(slots_per_epoch),
                root: block_root,
            };
            self.insert_checkpoint(checkpoint, advanced.clone());
        }

        Ok(advanced)
    }

    /// Advance `base` across empty slots to `target_slot`, offloading to the
    /// CPU pool when the distance exceeds the configured threshold.
    fn advance_slots(
        &self,
        base: CachedState<T::EthSpec>,
        target_slot: Slot,
    ) -> Result<CachedState<T::EthSpec>, RegenError> {
        let distance = target_slot - base.slot();
        let timer = metrics::start_timer(&metrics::SLOT_ADVANCE_TIMES);

        let result = if distance > self.config.cpu_offload_threshold_slots {
            let transitioner = self.transitioner.clone();
            let state = (*base.state).clone();
            let state_root = base.state_root;
            self.offload
                .run(move || transitioner.process_slots(state, Some(state_root), target_slot))
        } else {
            self.transitioner
                .process_slots((*base.state).clone(), Some(base.state_root), target_slot)
        };

        metrics::stop_timer(timer);

        Ok(CachedState::from_state(result?))
    }

    /// Walk ancestors of `parent` to the first block with `slot <=
    /// boundary_slot`.
    fn find_anchor(
        &self,
        parent_root: Hash256,
        parent: &BeaconBlock,
        boundary_slot: Slot,
    ) -> Result<(Hash256, Slot), RegenError> {
        if parent.slot <= boundary_slot {
            return Ok((parent_root, parent.slot));
        }

        for item in self.block_source.ancestors(parent_root, boundary_slot) {
            let (root, block) = item?;
            if block.slot <= boundary_slot {
                return Ok((root, block.slot));
            }
        }

        // The walk ran out before reaching the boundary: the covering
        // ancestor has been pruned.
        Err(RegenError::UnknownBlock(parent_root))
    }

    /// Apply `chain` (oldest first) on top of `anchor`, advancing empty slots
    /// between blocks. Epoch-boundary and explicitly watched post-block
    /// states are retained in the hot cache.
    fn replay_blocks(
        &self,
        anchor: CachedState<T::EthSpec>,
        chain: Vec<BeaconBlock>,
        cancel: &CancelSignal,
    ) -> Result<CachedState<T::EthSpec>, RegenError> {
        let slots_per_epoch = T::EthSpec::slots_per_epoch();

        metrics::inc_counter_by(&metrics::REPLAYED_BLOCKS, chain.len() as u64);

        let mut current = anchor;

        for block in chain {
            // Cancellation is observed between replay steps only; a partial
            // replay installs nothing.
            if cancel.is_cancelled() {
                return Err(RegenError::Cancelled);
            }

            if block.slot > current.slot() {
                current = self.advance_slots(current, block.slot)?;
            }

            let state = self
                .transitioner
                .process_block((*current.state).clone(), &block)?;

            // The transitioner has verified the block's state-root
            // commitment, so it can be adopted without re-hashing.
            current = CachedState::new(block.state_root, Arc::new(state));

            if current.slot().is_epoch_boundary(slots_per_epoch)
                || self.watched_roots.lock().remove(&current.state_root)
            {
                self.insert_hot(current.clone());
            }
        }

        Ok(current)
    }

    /// Insert into the hot cache unless the state is below finalization.
    fn insert_hot(&self, state: CachedState<T::EthSpec>) {
        if state.slot() < self.finalized.read().slot {
            return;
        }
        self.state_cache.lock().put(state);
    }

    /// Insert into the checkpoint cache unless the checkpoint is outside the
    /// retention window.
    fn insert_checkpoint(&self, checkpoint: Checkpoint, state: CachedState<T::EthSpec>) {
        let finalized_epoch = self.finalized.read().epoch;
        if checkpoint.epoch < finalized_epoch - self.config.checkpoint_retention_epochs {
            return;
        }

        if let Err(e) = self.checkpoint_cache.lock().put(checkpoint, state) {
            // Unreachable from internal paths; a bug elsewhere if it fires.
            warn!(self.log, "Refused checkpoint cache insert"; "error" => ?e);
        }
    }
}
