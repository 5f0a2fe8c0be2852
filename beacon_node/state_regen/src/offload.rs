//! A fixed pool of worker threads for CPU-heavy transition work.
//!
//! Multi-epoch slot advances are executed here instead of on the calling
//! thread, bounding the number of concurrent replays to the pool width. The
//! caller blocks until its job completes; a panicking job is re-raised on the
//! calling thread so the worker survives.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::Builder;

type Job = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Critical {
    done: bool,
    jobs: VecDeque<Job>,
}

#[derive(Default)]
struct Shared {
    critical: Mutex<Critical>,
    condvar: Condvar,
}

pub struct OffloadPool {
    shared: Arc<Shared>,
}

impl OffloadPool {
    pub fn new(threads: usize) -> Result<Self, std::io::Error> {
        let shared = Arc::new(Shared::default());

        for index in 0..threads.max(1) {
            let shared = shared.clone();

            Builder::new()
                .name(format!("regen-offload-{index}"))
                .spawn(move || run_worker(&shared))?;
        }

        Ok(OffloadPool { shared })
    }

    /// Run `f` on the pool, blocking until it completes.
    pub fn run<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let cell = Arc::new((
            Mutex::new(None::<std::thread::Result<R>>),
            Condvar::new(),
        ));

        let job_cell = cell.clone();
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(f));
            *job_cell.0.lock() = Some(result);
            job_cell.1.notify_all();
        });

        {
            let mut critical = self.shared.critical.lock();
            critical.jobs.push_back(job);
        }
        self.shared.condvar.notify_one();

        let mut slot = cell.0.lock();
        while slot.is_none() {
            cell.1.wait(&mut slot);
        }

        match slot.take().expect("loop exits only once the job has finished") {
            Ok(value) => value,
            Err(panic) => resume_unwind(panic),
        }
    }
}

impl Drop for OffloadPool {
    fn drop(&mut self) {
        self.shared.critical.lock().done = true;
        self.shared.condvar.notify_all();
    }
}

fn run_worker(shared: &Shared) {
    loop {
        let job = {
            let mut critical = shared.critical.lock();
            loop {
                if critical.done {
                    return;
                }
                if let Some(job) = critical.jobs.pop_front() {
                    break job;
                }
                shared.condvar.wait(&mut critical);
            }
        };

        job();
    }
}
