//! Persistent worker pool for one rank bucket
//!
//! Each multi-member bucket gets its own pool the first time it runs. The
//! workers stay parked on a condition variable between passes and are reused
//! for every later pass over the same bucket, so a long run spawns threads
//! only once.
//!
//! # Barrier protocol
//!
//! ```text
//! coordinator                       worker i
//! -----------                       --------
//! lock; job = J; generation += 1
//! remaining = workers; notify_all   wakes on generation change
//! wait until remaining == 0         evaluates its slice into a local SyncState
//!                                   lock; outcome[i] = state; remaining -= 1
//!                                   last worker notifies done
//! merge outcomes in worker order
//! ```
//!
//! # Critical Invariants
//!
//! 1. **One job per generation**: a worker runs a job once per generation bump
//! 2. **Full barrier**: `run` returns only after every worker has reported
//! 3. **Deterministic merge**: outcomes merge in slice order, so the reported
//!    failure matches what a sequential walk of the bucket would report

use crate::models::model::Model;
use crate::models::object::ObjectId;
use crate::orchestrator::SimulationError;
use crate::scheduler::pass::{evaluate_object, SyncJob, SyncSettings, SyncState};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Split `len` members over at most `workers` threads
///
/// Returns the slice length per worker. With no more members than workers
/// every member gets its own thread.
///
/// # Example
/// ```
/// use grid_simulator_core_rs::scheduler::worker_pool::chunk_size;
///
/// assert_eq!(chunk_size(10, 4), 3);
/// assert_eq!(chunk_size(3, 8), 1);
/// ```
pub fn chunk_size(len: usize, workers: usize) -> usize {
    let workers = workers.max(1);
    len.div_ceil(workers).max(1)
}

struct Control {
    generation: u64,
    job: Option<SyncJob>,
    remaining: usize,
    outcomes: Vec<Option<SyncState>>,
    shutdown: bool,
}

struct Shared {
    control: Mutex<Control>,
    start: Condvar,
    done: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Threads dedicated to one bucket
pub struct BucketPool {
    slot: usize,
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl BucketPool {
    /// Start one parked worker per slice of `members`
    ///
    /// # Errors
    /// `WorkerSpawn` if the OS refuses a thread; workers already started are
    /// shut down before returning.
    pub fn spawn(
        slot: usize,
        model: Arc<Model>,
        members: Arc<[ObjectId]>,
        max_workers: usize,
        settings: Arc<SyncSettings>,
    ) -> Result<Self, SimulationError> {
        let chunk = chunk_size(members.len(), max_workers);
        let workers = members.len().div_ceil(chunk);

        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                generation: 0,
                job: None,
                remaining: 0,
                outcomes: vec![None; workers],
                shutdown: false,
            }),
            start: Condvar::new(),
            done: Condvar::new(),
        });

        let mut pool = BucketPool {
            slot,
            shared,
            handles: Vec::with_capacity(workers),
        };

        for worker in 0..workers {
            let start = worker * chunk;
            let end = (start + chunk).min(members.len());
            let context = WorkerContext {
                worker,
                range: start..end,
                shared: Arc::clone(&pool.shared),
                model: Arc::clone(&model),
                members: Arc::clone(&members),
                settings: Arc::clone(&settings),
            };
            let handle = thread::Builder::new()
                .name(format!("sync-b{}-w{}", slot, worker))
                .spawn(move || context.run())
                .map_err(|e| SimulationError::WorkerSpawn(e.to_string()))?;
            pool.handles.push(handle);
        }

        debug!(bucket = slot, members = members.len(), workers, "Bucket pool started");
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Release every worker on `job` and wait until all have reported
    pub fn run(&self, job: SyncJob) -> SyncState {
        let mut control = self.shared.lock();
        control.job = Some(job);
        control.remaining = self.handles.len();
        control.outcomes.iter_mut().for_each(|o| *o = None);
        control.generation += 1;
        self.shared.start.notify_all();

        while control.remaining > 0 {
            control = self
                .shared
                .done
                .wait(control)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }

        let mut merged = SyncState::new();
        for outcome in control.outcomes.iter_mut() {
            if let Some(state) = outcome.take() {
                merged.merge(state);
            }
        }
        merged
    }
}

impl Drop for BucketPool {
    fn drop(&mut self) {
        {
            let mut control = self.shared.lock();
            control.shutdown = true;
            self.shared.start.notify_all();
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.join() {
                error!(bucket = self.slot, "Worker thread panicked: {:?}", e);
            }
        }
    }
}

struct WorkerContext {
    worker: usize,
    range: std::ops::Range<usize>,
    shared: Arc<Shared>,
    model: Arc<Model>,
    members: Arc<[ObjectId]>,
    settings: Arc<SyncSettings>,
}

impl WorkerContext {
    fn run(self) {
        let mut seen = 0u64;
        loop {
            let job = {
                let mut control = self.shared.lock();
                while control.generation == seen && !control.shutdown {
                    control = self
                        .shared
                        .start
                        .wait(control)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                if control.shutdown {
                    return;
                }
                seen = control.generation;
                control.job
            };

            let mut state = SyncState::new();
            if let Some(job) = job {
                for &id in &self.members[self.range.clone()] {
                    match self.model.get(id) {
                        Some(object) => evaluate_object(object, &job, &self.settings, &mut state),
                        None => state.fail(SimulationError::UnknownObject(id)),
                    }
                    if state.failure.is_some() {
                        break;
                    }
                }
            }

            let mut control = self.shared.lock();
            control.outcomes[self.worker] = Some(state);
            control.remaining -= 1;
            if control.remaining == 0 {
                self.shared.done.notify_one();
            }
        }
    }
}
