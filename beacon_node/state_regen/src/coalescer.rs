//! One-in-flight-per-key work registry.
//!
//! The first caller to arrive for a key installs a shared handle and performs
//! the computation; every later caller for the same key waits on the handle
//! and observes the identical outcome. Completion — success or failure —
//! removes the entry and wakes all waiters exactly once, so failures are
//! never cached and a later caller recomputes from scratch.
//!
//! Cancellation is cooperative. A waiter that cancels simply stops waiting;
//! the computation keeps running while any other waiter remains. The
//! computing closure is handed a [`WorkContext`] and may poll
//! [`WorkContext::should_abort`] between steps to stop early once its own
//! caller has cancelled and nobody else is waiting.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Interval at which blocked callers re-check their cancellation signal.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A shared flag with which a caller abandons an in-flight query.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How an arrival for a *new* key is admitted when the registry is at its
/// bound. Joining an existing key is always admitted regardless.
///
/// Computations started from inside another computation must use `Nested`:
/// they already hold a slot transitively, and blocking them on the gate could
/// deadlock the registry once every slot is held by a computation waiting on
/// its own nested work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Block until a slot frees up. For query entry points.
    Bounded,
    /// Admit unconditionally. For work spawned from inside other work.
    Nested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalesceError {
    /// The caller's cancellation signal fired while waiting.
    Cancelled,
    /// The computation disappeared without broadcasting a result (it
    /// panicked, or was abandoned after every waiter cancelled).
    Abandoned,
}

/// View of the in-flight entry handed to the computing closure.
pub struct WorkContext<'a> {
    cancel: &'a CancelSignal,
    waiters: &'a AtomicUsize,
}

impl<'a> WorkContext<'a> {
    /// `true` once the computing caller has cancelled *and* no other caller
    /// is waiting for the result. While anyone is still waiting the work must
    /// carry on regardless of who started it.
    pub fn should_abort(&self) -> bool {
        self.cancel.is_cancelled() && self.waiters.load(Ordering::SeqCst) == 0
    }
}

enum Progress<V> {
    Pending,
    Complete(V),
    Abandoned,
}

struct Handle<V> {
    progress: Mutex<Progress<V>>,
    condvar: Condvar,
    waiters: AtomicUsize,
}

impl<V: Clone> Handle<V> {
    fn new() -> Self {
        Handle {
            progress: Mutex::new(Progress::Pending),
            condvar: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    fn await_outcome(&self, cancel: &CancelSignal) -> Result<V, CoalesceError> {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let _guard = WaiterGuard(&self.waiters);

        let mut progress = self.progress.lock();
        loop {
            match &*progress {
                Progress::Complete(value) => return Ok(value.clone()),
                Progress::Abandoned => return Err(CoalesceError::Abandoned),
                Progress::Pending => {
                    if cancel.is_cancelled() {
                        return Err(CoalesceError::Cancelled);
                    }
                    self.condvar.wait_for(&mut progress, CANCEL_POLL_INTERVAL);
                }
            }
        }
    }
}

/// Decrements the waiter count however the wait ends, including cancellation.
struct WaiterGuard<'a>(&'a AtomicUsize);

impl<'a> Drop for WaiterGuard<'a> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registry of in-flight computations, one per key.
pub struct WorkRegistry<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    inflight: Mutex<HashMap<K, Arc<Handle<V>>>>,
    admission: Condvar,
    max_inflight: usize,
}

enum Role<V> {
    Perform(Arc<Handle<V>>),
    Await(Arc<Handle<V>>),
}

impl<K, V> WorkRegistry<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// `max_inflight` bounds the number of distinct keys computing at once.
    /// Arrivals for a new key block until admitted; joining an existing key
    /// is always admitted.
    pub fn new(max_inflight: usize) -> Self {
        WorkRegistry {
            inflight: Mutex::new(HashMap::new()),
            admission: Condvar::new(),
            max_inflight: max_inflight.max(1),
        }
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Compute the value for `key`, or wait for a computation already in
    /// flight and observe its outcome.
    pub fn get_or_compute<F>(
        &self,
        key: &K,
        cancel: &CancelSignal,
        admission: Admission,
        f: F,
    ) -> Result<V, CoalesceError>
    where
        F: FnOnce(&WorkContext) -> V,
    {
        let role = {
            let mut inflight = self.inflight.lock();
            loop {
                if let Some(handle) = inflight.get(key) {
                    break Role::Await(handle.clone());
                }

                if admission == Admission::Nested || inflight.len() < self.max_inflight {
                    let handle = Arc::new(Handle::new());
                    inflight.insert(key.clone(), handle.clone());
                    break Role::Perform(handle);
                }

                if cancel.is_cancelled() {
                    return Err(CoalesceError::Cancelled);
                }
                self.admission.wait_for(&mut inflight, CANCEL_POLL_INTERVAL);
            }
        };

        match role {
            Role::Await(handle) => handle.await_outcome(cancel),
            Role::Perform(handle) => {
                let guard = CompletionGuard {
                    registry: self,
                    key,
                    handle: &handle,
                    armed: true,
                };

                let context = WorkContext {
                    cancel,
                    waiters: &handle.waiters,
                };
                let value = f(&context);

                guard.complete(value.clone());
                Ok(value)
            }
        }
    }

    fn finish(&self, key: &K, handle: &Handle<V>, progress: Progress<V>) {
        *handle.progress.lock() = progress;
        handle.condvar.notify_all();

        self.inflight.lock().remove(key);
        self.admission.notify_all();
    }
}

/// Broadcasts an outcome exactly once: the computed value on the normal path,
/// or `Abandoned` if the computation unwinds, so waiters never hang on a
/// panicked peer.
struct CompletionGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    registry: &'a WorkRegistry<K, V>,
    key: &'a K,
    handle: &'a Handle<V>,
    armed: bool,
}

impl<'a, K, V> CompletionGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn complete(mut self, value: V) {
        self.armed = false;
        self.registry
            .finish(self.key, self.handle, Progress::Complete(value));
    }
}

impl<'a, K, V> Drop for CompletionGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if self.armed {
            self.registry
                .finish(self.key, self.handle, Progress::Abandoned);
        }
    }
}
