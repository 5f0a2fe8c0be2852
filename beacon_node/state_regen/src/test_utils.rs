//! In-memory collaborators and a harness for driving the regenerator in
//! tests.
//!
//! The harness builds real chains through the transition engine, so every
//! block and state it hands out satisfies the protocol's root linkage. All
//! state-source reads are recorded and all transitioner invocations counted,
//! letting tests assert on replay and load behavior.

use crate::coalescer::CancelSignal;
use crate::config::RegenConfig;
use crate::errors::RegenError;
use crate::regenerator::StateRegenerator;
use crate::{
    AncestorBlocksIter, BlockSource, DefaultTransitioner, FinalizedAnchor, RegenTypes,
    StateSource, StateSourceError, TransitionError, Transitioner,
};
use parking_lot::{Mutex, RwLock};
use sloggers::null::NullLoggerBuilder;
use sloggers::Build;
use ssz::{Decode, Encode};
use state_processing::{complete_state_advance, per_block_processing, VerifyStateRoot};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use types::{
    BeaconBlock, BeaconState, Epoch, EthSpec, Hash256, MinimalEthSpec, Slot, Validator,
};

pub const DEFAULT_VALIDATOR_COUNT: usize = 8;

pub fn test_logger() -> slog::Logger {
    NullLoggerBuilder.build().expect("logger should build")
}

/// Block arena backed by a hash map, with parent-pointer ancestor walks.
pub struct MemoryBlockSource<E: EthSpec> {
    blocks: RwLock<HashMap<Hash256, BeaconBlock>>,
    finalized: RwLock<FinalizedAnchor>,
    _phantom: PhantomData<E>,
}

impl<E: EthSpec> MemoryBlockSource<E> {
    pub fn new(finalized: FinalizedAnchor) -> Self {
        MemoryBlockSource {
            blocks: RwLock::new(HashMap::new()),
            finalized: RwLock::new(finalized),
            _phantom: PhantomData,
        }
    }

    pub fn insert_block(&self, block_root: Hash256, block: BeaconBlock) {
        self.blocks.write().insert(block_root, block);
    }

    pub fn remove_block(&self, block_root: &Hash256) {
        self.blocks.write().remove(block_root);
    }

    pub fn set_finalized(&self, finalized: FinalizedAnchor) {
        *self.finalized.write() = finalized;
    }
}

struct MemoryAncestorsIter<'a, E: EthSpec> {
    source: &'a MemoryBlockSource<E>,
    next_root: Option<Hash256>,
    stop_slot: Slot,
}

impl<'a, E: EthSpec> Iterator for MemoryAncestorsIter<'a, E> {
    type Item = Result<(Hash256, BeaconBlock), RegenError>;

    fn next(&mut self) -> Option<Self::Item> {
        let root = self.next_root?;

        match self.source.blocks.read().get(&root).cloned() {
            Some(block) => {
                self.next_root = if block.slot <= self.stop_slot {
                    // `block` is the first ancestor at or below the stop
                    // slot; it terminates the walk.
                    None
                } else {
                    Some(block.parent_root)
                };
                Some(Ok((root, block)))
            }
            None => {
                self.next_root = None;
                Some(Err(RegenError::UnknownBlock(root)))
            }
        }
    }
}

impl<E: EthSpec> BlockSource<E> for MemoryBlockSource<E> {
    fn get_block(&self, block_root: &Hash256) -> Option<BeaconBlock> {
        self.blocks.read().get(block_root).cloned()
    }

    fn ancestors(&self, block_root: Hash256, stop_slot: Slot) -> AncestorBlocksIter<'_> {
        Box::new(MemoryAncestorsIter {
            source: self,
            next_root: Some(block_root),
            stop_slot,
        })
    }

    fn finalized(&self) -> FinalizedAnchor {
        *self.finalized.read()
    }
}

/// State store backed by SSZ bytes in a hash map.
///
/// Every load is recorded; an optional artificial latency lets tests hold a
/// load open while concurrent callers pile up on it.
pub struct MemoryStateSource<E: EthSpec> {
    states: RwLock<HashMap<Hash256, Vec<u8>>>,
    loads: Mutex<Vec<Hash256>>,
    load_delay: RwLock<Option<Duration>>,
    _phantom: PhantomData<E>,
}

impl<E: EthSpec> MemoryStateSource<E> {
    pub fn new() -> Self {
        MemoryStateSource {
            states: RwLock::new(HashMap::new()),
            loads: Mutex::new(Vec::new()),
            load_delay: RwLock::new(None),
            _phantom: PhantomData,
        }
    }

    pub fn put_state(&self, state_root: Hash256, state: &BeaconState<E>) {
        self.states.write().insert(state_root, state.as_ssz_bytes());
    }

    pub fn delete_state(&self, state_root: &Hash256) {
        self.states.write().remove(state_root);
    }

    pub fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.write() = Some(delay);
    }

    /// Total number of `load_state` calls observed.
    pub fn load_count(&self) -> usize {
        self.loads.lock().len()
    }

    /// Number of `load_state` calls observed for `state_root`.
    pub fn loads_for(&self, state_root: &Hash256) -> usize {
        self.loads
            .lock()
            .iter()
            .filter(|root| *root == state_root)
            .count()
    }
}

impl<E: EthSpec> Default for MemoryStateSource<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EthSpec> StateSource<E> for MemoryStateSource<E> {
    fn load_state(&self, state_root: &Hash256) -> Result<BeaconState<E>, StateSourceError> {
        self.loads.lock().push(*state_root);

        if let Some(delay) = *self.load_delay.read() {
            std::thread::sleep(delay);
        }

        let bytes = self
            .states
            .read()
            .get(state_root)
            .cloned()
            .ok_or(StateSourceError::StateNotPersisted(*state_root))?;

        BeaconState::from_ssz_bytes(&bytes)
            .map_err(|e| StateSourceError::Database(format!("{e:?}")))
    }
}

/// Wraps a transitioner, counting invocations of each operation.
pub struct CountingTransitioner<E: EthSpec, T: Transitioner<E>> {
    inner: T,
    process_slots_calls: AtomicUsize,
    process_block_calls: AtomicUsize,
    _phantom: PhantomData<E>,
}

impl<E: EthSpec, T: Transitioner<E>> CountingTransitioner<E, T> {
    pub fn new(inner: T) -> Self {
        CountingTransitioner {
            inner,
            process_slots_calls: AtomicUsize::new(0),
            process_block_calls: AtomicUsize::new(0),
            _phantom: PhantomData,
        }
    }

    pub fn process_slots_calls(&self) -> usize {
        self.process_slots_calls.load(Ordering::SeqCst)
    }

    pub fn process_block_calls(&self) -> usize {
        self.process_block_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.process_slots_calls() + self.process_block_calls()
    }
}

impl<E: EthSpec, T: Transitioner<E>> Transitioner<E> for CountingTransitioner<E, T> {
    fn process_slots(
        &self,
        state: BeaconState<E>,
        state_root: Option<Hash256>,
        target_slot: Slot,
    ) -> Result<BeaconState<E>, TransitionError> {
        self.process_slots_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.process_slots(state, state_root, target_slot)
    }

    fn process_block(
        &self,
        state: BeaconState<E>,
        block: &BeaconBlock,
    ) -> Result<BeaconState<E>, TransitionError> {
        self.process_block_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.process_block(state, block)
    }
}

/// Collaborator bundle used by the harness.
pub struct MemoryRegenTypes<E: EthSpec>(PhantomData<E>);

impl<E: EthSpec> RegenTypes for MemoryRegenTypes<E> {
    type EthSpec = E;
    type BlockSource = MemoryBlockSource<E>;
    type StateSource = MemoryStateSource<E>;
    type Transitioner = CountingTransitioner<E, DefaultTransitioner>;
}

pub type TestRegenerator<E> = StateRegenerator<MemoryRegenTypes<E>>;

/// Builds chains of real blocks and states and wires them to a regenerator.
pub struct RegenHarness<E: EthSpec> {
    pub block_source: Arc<MemoryBlockSource<E>>,
    pub state_source: Arc<MemoryStateSource<E>>,
    pub transitioner: Arc<CountingTransitioner<E, DefaultTransitioner>>,
    pub regen: TestRegenerator<E>,
    /// Post-block state for every block produced, keyed by block root.
    pub states_by_block: HashMap<Hash256, BeaconState<E>>,
    pub genesis_block_root: Hash256,
    pub head_block_root: Hash256,
    next_body_byte: u8,
}

pub type TestHarness = RegenHarness<MinimalEthSpec>;

impl<E: EthSpec> RegenHarness<E> {
    pub fn new(config: RegenConfig) -> Self {
        Self::with_validator_count(config, DEFAULT_VALIDATOR_COUNT)
    }

    pub fn with_validator_count(config: RegenConfig, validator_count: usize) -> Self {
        let validators = (0..validator_count)
            .map(|_| Validator {
                effective_balance: 32_000_000_000,
                activation_epoch: Epoch::new(0),
                exit_epoch: Epoch::new(u64::MAX),
            })
            .collect();

        let mut genesis_state: BeaconState<E> =
            BeaconState::genesis(Hash256::repeat_byte(42), validators);
        genesis_state
            .build_committee_cache()
            .expect("genesis validators are active");

        let genesis_state_root = genesis_state.canonical_root();

        // The genesis block: an empty block committing to the genesis state.
        let genesis_block = BeaconBlock {
            slot: Slot::new(0),
            proposer_index: 0,
            parent_root: Hash256::zero(),
            state_root: genesis_state_root,
            body_root: Hash256::zero(),
        };
        let genesis_block_root = genesis_block.canonical_root();

        let finalized = FinalizedAnchor {
            epoch: Epoch::new(0),
            block_root: genesis_block_root,
            slot: Slot::new(0),
        };

        let block_source = Arc::new(MemoryBlockSource::new(finalized));
        let state_source = Arc::new(MemoryStateSource::new());
        let transitioner = Arc::new(CountingTransitioner::new(DefaultTransitioner));

        block_source.insert_block(genesis_block_root, genesis_block);
        state_source.put_state(genesis_state_root, &genesis_state);

        let regen = StateRegenerator::new(
            block_source.clone(),
            state_source.clone(),
            transitioner.clone(),
            config,
            test_logger(),
        )
        .expect("regenerator should build");

        let mut states_by_block = HashMap::new();
        states_by_block.insert(genesis_block_root, genesis_state);

        RegenHarness {
            block_source,
            state_source,
            transitioner,
            regen,
            states_by_block,
            genesis_block_root,
            head_block_root: genesis_block_root,
            next_body_byte: 1,
        }
    }

    /// Produce a block at `slot` on top of `parent_root` and persist its
    /// post-state. Returns the new block's root.
    pub fn add_block_on(&mut self, parent_root: Hash256, slot: Slot) -> Hash256 {
        let parent_state = self
            .states_by_block
            .get(&parent_root)
            .expect("parent must have been produced by this harness")
            .clone();
        assert!(slot > parent_state.slot, "blocks must advance the slot");

        let mut state = parent_state;
        complete_state_advance(&mut state, None, slot).expect("advance should succeed");

        let mut block = BeaconBlock {
            slot,
            proposer_index: slot.as_u64() % state.validators.len() as u64,
            parent_root: state.latest_block_header.canonical_root(),
            state_root: Hash256::zero(),
            body_root: Hash256::repeat_byte(self.next_body_byte),
        };
        self.next_body_byte = self.next_body_byte.wrapping_add(1).max(1);

        per_block_processing(&mut state, &block, VerifyStateRoot::False)
            .expect("block should apply");
        state
            .build_committee_cache()
            .expect("committee cache should build");
        block.state_root = state.canonical_root();

        let block_root = block.canonical_root();

        self.block_source.insert_block(block_root, block.clone());
        self.state_source.put_state(block.state_root, &state);
        self.states_by_block.insert(block_root, state);

        block_root
    }

    /// Extend the canonical chain by one block per slot for `count` slots.
    pub fn extend_chain(&mut self, count: u64) -> Vec<Hash256> {
        (0..count)
            .map(|_| {
                let head_slot = self.states_by_block[&self.head_block_root].slot;
                let root = self.add_block_on(self.head_block_root, head_slot + 1);
                self.head_block_root = root;
                root
            })
            .collect()
    }

    /// Produce a block `skip + 1` slots ahead of the head, leaving `skip`
    /// empty slots, and make it the new head.
    pub fn extend_with_skips(&mut self, skip: u64) -> Hash256 {
        let head_slot = self.states_by_block[&self.head_block_root].slot;
        let root = self.add_block_on(self.head_block_root, head_slot + skip + 1);
        self.head_block_root = root;
        root
    }

    /// Advance the finalized anchor in both fork choice and the regenerator.
    pub fn finalize(&self, epoch: Epoch, block_root: Hash256, slot: Slot) {
        let anchor = FinalizedAnchor {
            epoch,
            block_root,
            slot,
        };
        self.block_source.set_finalized(anchor);
        self.regen.on_finalized(epoch, block_root, slot);
    }

    pub fn block(&self, block_root: &Hash256) -> BeaconBlock {
        self.block_source
            .get_block(block_root)
            .expect("block should exist")
    }

    pub fn post_state(&self, block_root: &Hash256) -> &BeaconState<E> {
        &self.states_by_block[block_root]
    }

    pub fn no_cancel(&self) -> CancelSignal {
        CancelSignal::new()
    }
}
