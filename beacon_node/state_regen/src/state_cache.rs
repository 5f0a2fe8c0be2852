use crate::CachedState;
use lru::LruCache;
use std::num::NonZeroUsize;
use types::{EthSpec, Hash256, Slot};

/// In-memory cache of recently used states, keyed by state root.
///
/// Bounded by entry count with least-recently-used eviction. Pruning on
/// finalization is authoritative: every entry below the finalized slot is
/// removed regardless of how recently it was used.
#[derive(Debug)]
pub struct StateCache<E: EthSpec> {
    states: LruCache<Hash256, CachedState<E>>,
}

impl<E: EthSpec> StateCache<E> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        StateCache {
            states: LruCache::new(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Insert a state, evicting the least-recently-used entry when full.
    pub fn put(&mut self, state: CachedState<E>) {
        self.states.put(state.state_root, state);
    }

    /// Fetch a state, marking it as most recently used.
    pub fn get(&mut self, state_root: &Hash256) -> Option<CachedState<E>> {
        self.states.get(state_root).cloned()
    }

    /// Read a state without touching the usage order.
    pub fn peek(&self, state_root: &Hash256) -> Option<&CachedState<E>> {
        self.states.peek(state_root)
    }

    pub fn delete(&mut self, state_root: &Hash256) {
        self.states.pop(state_root);
    }

    /// Remove every entry with a slot strictly below `finalized_slot`.
    pub fn prune(&mut self, finalized_slot: Slot) {
        let finalized_roots: Vec<Hash256> = self
            .states
            .iter()
            .filter(|(_, state)| state.slot() < finalized_slot)
            .map(|(root, _)| *root)
            .collect();

        for root in finalized_roots {
            self.states.pop(&root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use types::{BeaconState, MinimalEthSpec};

    type E = MinimalEthSpec;

    fn state_at_slot(slot: u64) -> CachedState<E> {
        let mut state = BeaconState::genesis(Hash256::repeat_byte(1), vec![]);
        state.slot = Slot::new(slot);
        // Distinct synthetic roots keep the test independent of hashing.
        CachedState::new(Hash256::from_low_u64_be(slot + 1), Arc::new(state))
    }

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn put_get_round_trip() {
        let mut cache = StateCache::new(capacity(4));
        let state = state_at_slot(3);

        cache.put(state.clone());

        let fetched = cache.get(&state.state_root).unwrap();
        assert_eq!(fetched.state_root, state.state_root);
        assert!(Arc::ptr_eq(&fetched.state, &state.state));
    }

    #[test]
    fn bounded_by_capacity_with_lru_eviction() {
        let mut cache = StateCache::new(capacity(2));
        let a = state_at_slot(1);
        let b = state_at_slot(2);
        let c = state_at_slot(3);

        cache.put(a.clone());
        cache.put(b.clone());

        // Touch `a` so that `b` is the eviction candidate.
        cache.get(&a.state_root);
        cache.put(c.clone());

        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&a.state_root).is_some());
        assert!(cache.peek(&b.state_root).is_none());
        assert!(cache.peek(&c.state_root).is_some());
    }

    #[test]
    fn prune_removes_all_pre_finalized_entries() {
        let mut cache = StateCache::new(capacity(8));
        for slot in [30, 64, 96] {
            cache.put(state_at_slot(slot));
        }

        cache.prune(Slot::new(96));

        assert_eq!(cache.len(), 1);
        assert!(cache.peek(&state_at_slot(96).state_root).is_some());
    }

    #[test]
    fn delete_is_idempotent() {
        let mut cache = StateCache::new(capacity(2));
        let a = state_at_slot(1);

        cache.put(a.clone());
        cache.delete(&a.state_root);
        cache.delete(&a.state_root);

        assert!(cache.is_empty());
    }
}
