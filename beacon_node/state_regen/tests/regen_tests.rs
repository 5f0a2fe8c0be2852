use state_processing::complete_state_advance;
use state_regen::coalescer::CancelSignal;
use state_regen::config::RegenConfig;
use state_regen::test_utils::{RegenHarness, TestHarness};
use state_regen::RegenError;
use std::thread;
use std::time::Duration;
use types::{Checkpoint, Epoch, EthSpec, Hash256, MinimalEthSpec, Slot};

type E = MinimalEthSpec;

fn slots_per_epoch() -> u64 {
    E::slots_per_epoch()
}

fn harness() -> TestHarness {
    RegenHarness::new(RegenConfig::default())
}

#[test]
fn donated_state_serves_hot_hits() {
    let mut harness = harness();
    harness.extend_chain(3);

    let state = harness.post_state(&harness.head_block_root).clone();
    let state_root = harness.block(&harness.head_block_root).state_root;

    harness.regen.submit_processed_state(state);

    let fetched = harness
        .regen
        .get_state(state_root, &harness.no_cancel())
        .unwrap();

    assert_eq!(fetched.state_root, state_root);
    // The donation satisfied the query without touching the state source.
    assert_eq!(harness.state_source.load_count(), 0);
}

#[test]
fn cold_load_then_hot_hit() {
    let mut harness = harness();
    harness.extend_chain(2);

    let state_root = harness.block(&harness.head_block_root).state_root;

    let first = harness
        .regen
        .get_state(state_root, &harness.no_cancel())
        .unwrap();
    let second = harness
        .regen
        .get_state(state_root, &harness.no_cancel())
        .unwrap();

    assert_eq!(first.state_root, second.state_root);
    // Same identity, not merely an equal value.
    assert!(std::sync::Arc::ptr_eq(&first.state, &second.state));
    assert_eq!(harness.state_source.loads_for(&state_root), 1);
}

#[test]
fn concurrent_cold_loads_coalesce() {
    let mut harness = harness();
    harness.extend_chain(2);

    let state_root = harness.block(&harness.head_block_root).state_root;
    harness.state_source.set_load_delay(Duration::from_millis(300));

    thread::scope(|s| {
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let regen = &harness.regen;
                s.spawn(move || regen.get_state(state_root, &CancelSignal::new()))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap().state_root, state_root);
        }
    });

    // The store observed a single load despite three concurrent callers.
    assert_eq!(harness.state_source.loads_for(&state_root), 1);
}

#[test]
fn coalesced_failures_are_not_cached() {
    let harness = harness();
    let missing = Hash256::repeat_byte(0xcc);

    harness.state_source.set_load_delay(Duration::from_millis(200));

    thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let regen = &harness.regen;
                s.spawn(move || regen.get_state(missing, &CancelSignal::new()))
            })
            .collect();

        for handle in handles {
            assert_eq!(
                handle.join().unwrap(),
                Err(RegenError::StateNotAvailable(missing))
            );
        }
    });
    assert_eq!(harness.state_source.loads_for(&missing), 1);

    // A call after both failures re-attempts the load.
    assert_eq!(
        harness.regen.get_state(missing, &harness.no_cancel()),
        Err(RegenError::StateNotAvailable(missing))
    );
    assert_eq!(harness.state_source.loads_for(&missing), 2);
}

#[test]
fn checkpoint_state_materializes_at_the_boundary() {
    let mut harness = harness();
    // Head block one slot short of the epoch-3 boundary.
    harness.extend_chain(3 * slots_per_epoch() - 1);

    let head_root = harness.head_block_root;
    let boundary = Epoch::new(3).start_slot(slots_per_epoch());

    let mut expected = harness.post_state(&head_root).clone();
    complete_state_advance(&mut expected, None, boundary).unwrap();

    let checkpoint = Checkpoint {
        epoch: Epoch::new(3),
        root: head_root,
    };
    let state = harness
        .regen
        .get_checkpoint_state(checkpoint, &harness.no_cancel())
        .unwrap();

    assert_eq!(state.slot(), boundary);
    assert_eq!(state.slot() % slots_per_epoch(), 0);
    assert_eq!(state.state_root, expected.canonical_root());

    // One slot advance, once: the second call is a cache hit and invokes the
    // transitioner zero times.
    let calls_after_first = harness.transitioner.total_calls();
    let again = harness
        .regen
        .get_checkpoint_state(checkpoint, &harness.no_cancel())
        .unwrap();

    assert_eq!(again.state_root, state.state_root);
    assert_eq!(harness.transitioner.total_calls(), calls_after_first);
}

#[test]
fn block_slot_state_at_the_blocks_own_slot() {
    let mut harness = harness();
    harness.extend_chain(5);

    let head_root = harness.head_block_root;
    let block = harness.block(&head_root);

    let state = harness
        .regen
        .get_block_slot_state(head_root, block.slot, &harness.no_cancel())
        .unwrap();

    assert_eq!(state.state_root, block.state_root);
    assert_eq!(state.slot(), block.slot);
    // No slots advanced, no blocks applied.
    assert_eq!(harness.transitioner.total_calls(), 0);
}

#[test]
fn block_slot_state_below_block_fails() {
    let mut harness = harness();
    harness.extend_chain(5);

    let head_root = harness.head_block_root;
    let block_slot = harness.block(&head_root).slot;

    assert_eq!(
        harness
            .regen
            .get_block_slot_state(head_root, block_slot - 1, &harness.no_cancel()),
        Err(RegenError::InvalidSlot {
            block_slot,
            requested_slot: block_slot - 1,
        })
    );
}

#[test]
fn queries_for_unknown_blocks_fail() {
    let harness = harness();
    let bogus = Hash256::repeat_byte(0xde);

    assert_eq!(
        harness
            .regen
            .get_block_slot_state(bogus, Slot::new(10), &harness.no_cancel()),
        Err(RegenError::UnknownBlock(bogus))
    );

    let orphan = types::BeaconBlock {
        slot: Slot::new(10),
        proposer_index: 0,
        parent_root: bogus,
        state_root: Hash256::zero(),
        body_root: Hash256::zero(),
    };
    assert_eq!(
        harness.regen.get_pre_state(&orphan, &harness.no_cancel()),
        Err(RegenError::UnknownBlock(bogus))
    );
}

#[test]
fn pre_state_replays_only_blocks_after_the_anchor() {
    let mut harness = harness();

    // Blocks at every slot up to the epoch-1 boundary; the block sitting on
    // the boundary is the anchor.
    let epoch_blocks = harness.extend_chain(slots_per_epoch());
    let anchor_root = *epoch_blocks.last().unwrap();

    // Five more blocks extending from the anchor.
    let chain = harness.extend_chain(5);
    let b4_root = chain[3];
    let b5_root = chain[4];

    let pre_state = harness
        .regen
        .get_pre_state(&harness.block(&b5_root), &harness.no_cancel())
        .unwrap();

    // The pre-state is the post-state of the parent.
    assert_eq!(pre_state.state_root, harness.block(&b4_root).state_root);
    // Exactly the four blocks between the anchor and the parent replayed,
    // each preceded by its single-slot advance.
    assert_eq!(harness.transitioner.process_block_calls(), 4);
    assert_eq!(harness.transitioner.process_slots_calls(), 4);

    // A sibling of the head reuses the anchor checkpoint and replays the
    // same four blocks.
    let b5_sibling = harness.add_block_on(b4_root, harness.block(&b5_root).slot);
    let sibling_pre_state = harness
        .regen
        .get_pre_state(&harness.block(&b5_sibling), &harness.no_cancel())
        .unwrap();

    assert_eq!(sibling_pre_state.state_root, pre_state.state_root);
    assert_eq!(harness.transitioner.process_block_calls(), 8);
    // The anchor state came from the checkpoint cache, not a fresh load.
    assert_eq!(
        harness
            .state_source
            .loads_for(&harness.block(&anchor_root).state_root),
        1
    );
}

#[test]
fn pre_state_with_parent_below_the_boundary_needs_no_replay() {
    let mut harness = harness();

    // Blocks up to slot 7, then two skipped slots: the next block sits at
    // slot 10, on the far side of the epoch-1 boundary.
    harness.extend_chain(slots_per_epoch() - 1);
    let parent_root = harness.head_block_root;
    let block_root = harness.extend_with_skips(2);

    let pre_state = harness
        .regen
        .get_pre_state(&harness.block(&block_root), &harness.no_cancel())
        .unwrap();

    // The checkpoint state itself is the pre-state: the parent advanced
    // through empty slots to the boundary, no blocks replayed.
    assert_eq!(pre_state.slot(), Epoch::new(1).start_slot(slots_per_epoch()));
    assert_ne!(pre_state.state_root, harness.block(&parent_root).state_root);
    assert_eq!(harness.transitioner.process_block_calls(), 0);
    assert_eq!(harness.transitioner.process_slots_calls(), 1);
}

#[test]
fn pre_state_of_a_child_of_the_finalized_block() {
    let mut harness = harness();

    // The head lands exactly on the epoch-2 boundary and becomes finalized.
    let blocks = harness.extend_chain(2 * slots_per_epoch());
    let finalized_root = *blocks.last().unwrap();
    let finalized_slot = harness.block(&finalized_root).slot;
    harness.finalize(Epoch::new(2), finalized_root, finalized_slot);

    let child_root = harness.add_block_on(finalized_root, finalized_slot + 1);
    let child = harness.block(&child_root);

    let pre_state = harness
        .regen
        .get_pre_state(&child, &harness.no_cancel())
        .unwrap();

    assert_eq!(pre_state.state_root, harness.block(&finalized_root).state_root);
}

#[test]
fn finalization_prunes_both_caches() {
    let mut harness = harness();
    let blocks = harness.extend_chain(4 * slots_per_epoch());
    let spe = slots_per_epoch() as usize;

    // Populate the checkpoint cache for epochs 1 through 4; the nested state
    // loads also populate the hot cache with the boundary blocks' states.
    for epoch in 1..=4u64 {
        let block_root = blocks[epoch as usize * spe - 1];
        harness
            .regen
            .get_checkpoint_state(
                Checkpoint {
                    epoch: Epoch::new(epoch),
                    root: block_root,
                },
                &harness.no_cancel(),
            )
            .unwrap();
    }
    assert_eq!(harness.regen.checkpoint_cache_len(), 4);
    assert_eq!(harness.regen.state_cache_len(), 4);

    let finalized_root = *blocks.last().unwrap();
    let finalized_slot = harness.block(&finalized_root).slot;
    harness.finalize(Epoch::new(4), finalized_root, finalized_slot);

    // Retention is two epochs: the epoch-1 checkpoint goes, 2..4 stay.
    assert_eq!(harness.regen.checkpoint_cache_len(), 3);
    // Every hot entry below the finalized slot goes.
    assert_eq!(harness.regen.state_cache_len(), 1);

    // A pruned state falls through to the state source again.
    let pruned_root = harness.block(&blocks[spe - 1]).state_root;
    harness
        .regen
        .get_state(pruned_root, &harness.no_cancel())
        .unwrap();
    assert_eq!(harness.state_source.loads_for(&pruned_root), 2);
}

#[test]
fn results_below_the_finalized_anchor_are_not_cached() {
    let mut harness = harness();
    let blocks = harness.extend_chain(2 * slots_per_epoch() + 4);

    let finalized_root = blocks[2 * slots_per_epoch() as usize - 1];
    let finalized_slot = harness.block(&finalized_root).slot;
    harness.finalize(Epoch::new(2), finalized_root, finalized_slot);

    // A state below the anchor can still be served...
    let old_root = harness.block(&blocks[3]).state_root;
    let cached_before = harness.regen.state_cache_len();
    harness
        .regen
        .get_state(old_root, &harness.no_cancel())
        .unwrap();

    // ...but is not retained.
    assert_eq!(harness.regen.state_cache_len(), cached_before);
    harness
        .regen
        .get_state(old_root, &harness.no_cancel())
        .unwrap();
    assert_eq!(harness.state_source.loads_for(&old_root), 2);
}

#[test]
fn cache_sizes_stay_bounded() {
    let config = RegenConfig {
        max_hot_states: 2,
        max_checkpoint_states: 2,
        ..RegenConfig::default()
    };
    let mut harness = TestHarness::new(config);
    let blocks = harness.extend_chain(2 * slots_per_epoch());

    for root in &blocks {
        let state_root = harness.block(root).state_root;
        harness
            .regen
            .get_state(state_root, &harness.no_cancel())
            .unwrap();
        assert!(harness.regen.state_cache_len() <= 2);
    }

    let checkpoints = [
        Checkpoint {
            epoch: Epoch::new(0),
            root: harness.genesis_block_root,
        },
        Checkpoint {
            epoch: Epoch::new(1),
            root: blocks[slots_per_epoch() as usize - 1],
        },
        Checkpoint {
            epoch: Epoch::new(2),
            root: blocks[2 * slots_per_epoch() as usize - 1],
        },
    ];
    for checkpoint in checkpoints {
        harness
            .regen
            .get_checkpoint_state(checkpoint, &harness.no_cancel())
            .unwrap();
        assert!(harness.regen.checkpoint_cache_len() <= 2);
    }
}

#[test]
fn donation_of_an_inconsistent_state_is_ignored() {
    let mut harness = harness();
    harness.extend_chain(3);

    let mut tampered = harness.post_state(&harness.head_block_root).clone();
    tampered.balances[0] += 1;
    let tampered_root = tampered.canonical_root();

    harness.regen.submit_processed_state(tampered);

    assert_eq!(harness.regen.state_cache_len(), 0);
    assert_eq!(
        harness.regen.get_state(tampered_root, &harness.no_cancel()),
        Err(RegenError::StateNotAvailable(tampered_root))
    );
}

#[test]
fn cancelled_waiter_does_not_disturb_its_peer() {
    let mut harness = harness();
    harness.extend_chain(2);

    let state_root = harness.block(&harness.head_block_root).state_root;
    harness.state_source.set_load_delay(Duration::from_millis(300));

    let cancel = CancelSignal::new();

    thread::scope(|s| {
        let regen = &harness.regen;
        let performer = s.spawn(move || regen.get_state(state_root, &CancelSignal::new()));

        // Join the in-flight load, then cancel.
        thread::sleep(Duration::from_millis(50));
        let waiter_cancel = cancel.clone();
        let waiter = s.spawn(move || regen.get_state(state_root, &waiter_cancel));

        thread::sleep(Duration::from_millis(50));
        cancel.cancel();

        assert_eq!(performer.join().unwrap().unwrap().state_root, state_root);
        // The waiter either left with `Cancelled` or raced the completion.
        let waiter_result = waiter.join().unwrap();
        assert!(
            waiter_result == Err(RegenError::Cancelled)
                || waiter_result.as_ref().is_ok_and(|s| s.state_root == state_root)
        );
    });

    // The cancellation did not roll back the completed insert.
    harness
        .regen
        .get_state(state_root, &harness.no_cancel())
        .unwrap();
    assert_eq!(harness.state_source.loads_for(&state_root), 1);
}

#[test]
fn offloaded_advance_matches_inline_processing() {
    let config = RegenConfig {
        // Any advance longer than half an epoch runs on the offload pool.
        cpu_offload_threshold_slots: slots_per_epoch() / 2,
        ..RegenConfig::default()
    };
    let mut harness = TestHarness::new(config);
    harness.extend_chain(3);

    let head_root = harness.head_block_root;
    let head_slot = harness.block(&head_root).slot;
    let target = head_slot + 3 * slots_per_epoch();

    let mut expected = harness.post_state(&head_root).clone();
    complete_state_advance(&mut expected, None, target).unwrap();

    let state = harness
        .regen
        .get_block_slot_state(head_root, target, &harness.no_cancel())
        .unwrap();

    assert_eq!(state.slot(), target);
    assert_eq!(state.state_root, expected.canonical_root());
}

#[test]
fn interesting_roots_are_retained_during_replay() {
    let mut harness = harness();
    harness.extend_chain(slots_per_epoch());
    let chain = harness.extend_chain(5);

    let b2_state_root = harness.block(&chain[1]).state_root;
    harness.regen.mark_state_root_interesting(b2_state_root);

    harness
        .regen
        .get_pre_state(&harness.block(&chain[4]), &harness.no_cancel())
        .unwrap();

    // The marked intermediate state was kept, so no load is needed.
    harness
        .regen
        .get_state(b2_state_root, &harness.no_cancel())
        .unwrap();
    assert_eq!(harness.state_source.loads_for(&b2_state_root), 0);
}

#[test]
fn finalized_anchor_is_monotonic() {
    let mut harness = harness();
    let blocks = harness.extend_chain(2 * slots_per_epoch() + 4);

    let finalized_root = blocks[2 * slots_per_epoch() as usize - 1];
    let finalized_slot = harness.block(&finalized_root).slot;
    harness.finalize(Epoch::new(2), finalized_root, finalized_slot);

    let head_state_root = harness.block(&harness.head_block_root).state_root;
    harness
        .regen
        .get_state(head_state_root, &harness.no_cancel())
        .unwrap();
    assert_eq!(harness.regen.state_cache_len(), 1);

    // A stale, lower finalization report is ignored and prunes nothing.
    harness
        .regen
        .on_finalized(Epoch::new(1), finalized_root, Slot::new(u64::MAX));
    assert_eq!(harness.regen.state_cache_len(), 1);
}
