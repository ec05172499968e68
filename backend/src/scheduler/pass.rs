//! Pass executor
//!
//! One pass visits the buckets of a pass type in traversal order. Inside a
//! bucket every member is synchronised to the same global time, either on the
//! coordinator thread or on the bucket's worker pool. Results fold into a
//! [`SyncState`] that the convergence loop accumulates over the three passes
//! of one iteration.
//!
//! # Critical Invariants
//!
//! 1. **Bucket barrier**: a bucket completes before the next one starts
//! 2. **Fail after barrier**: a failure inside a bucket is reported only once
//!    the whole bucket has finished, never mid-bucket
//! 3. **Same answer on any thread count**: the merged state of a bucket does
//!    not depend on how its members were split over workers

use crate::core::time::Timestamp;
use crate::models::behavior::NextChange;
use crate::models::model::Model;
use crate::models::object::{ObjectFlags, PassType, ServiceStatus, SimObject};
use crate::orchestrator::SimulationError;
use crate::scheduler::rank_index::RankIndex;
use crate::scheduler::worker_pool::BucketPool;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{trace, warn};

// ============================================================================
// Sync bookkeeping
// ============================================================================

/// What one pass over one bucket is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncJob {
    /// Global time every object is synchronised to
    pub time: Timestamp,
    pub pass: PassType,
    /// Iterations left in the budget for this timestep, counting this one
    pub iterations_left: u32,
}

/// Run-wide sync options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Quantum next-change times are rounded up to (values <= 1 disable it)
    pub minimum_timestep: i64,
    /// Window during which `SKIP_SAFE` objects may skip their sync (0 disables it)
    pub skipsafe: i64,
    /// Configured stop time; in-service times past it are soft events
    pub stop_time: Timestamp,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            minimum_timestep: 0,
            skipsafe: 0,
            stop_time: Timestamp::NEVER,
        }
    }
}

/// Accumulated outcome of one or more bucket runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// Earliest next-change time reported so far
    pub step_to: Timestamp,
    /// Number of hard events reported
    pub hard_events: u32,
    /// Number of objects evaluated
    pub objects_synced: u64,
    /// First failure seen
    pub failure: Option<SimulationError>,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            step_to: Timestamp::NEVER,
            hard_events: 0,
            objects_synced: 0,
            failure: None,
        }
    }

    /// Record a failure, keeping the first one
    pub fn fail(&mut self, error: SimulationError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    /// Fold another state into this one
    pub fn merge(&mut self, other: SyncState) {
        self.step_to = self.step_to.min(other.step_to);
        self.hard_events += other.hard_events;
        self.objects_synced += other.objects_synced;
        if let Some(failure) = other.failure {
            self.fail(failure);
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Object evaluation
// ============================================================================

/// Synchronise one object and fold its result into `state`
///
/// Objects not yet in service report their in-service time, as a hard event
/// when it falls within the run and a soft one past the stop time; retired
/// objects report `NEVER`. Soft events move `step_to` without counting as
/// hard events. A result earlier than the job time is a stalled clock. Only
/// objects whose callback actually ran count towards `objects_synced`.
pub fn evaluate_object(object: &SimObject, job: &SyncJob, settings: &SyncSettings, state: &mut SyncState) {
    let time = job.time;
    let change = match object.service().status_at(time) {
        ServiceStatus::Pending(in_service) if in_service <= settings.stop_time => NextChange::At(in_service),
        ServiceStatus::Pending(in_service) => NextChange::Soft(in_service),
        ServiceStatus::Retired => NextChange::Never,
        ServiceStatus::Active => match sync_in_service(object, job, settings) {
            Ok((change, ran)) => {
                if ran {
                    state.objects_synced += 1;
                }
                change
            }
            Err(message) => {
                state.fail(SimulationError::SyncFailed {
                    object: object.id(),
                    name: object.display_name(),
                    time,
                    pass: job.pass,
                    message,
                });
                return;
            }
        },
    };

    if change.is_hard() {
        state.hard_events += 1;
    }

    let mut next = change.time();
    trace!(
        time = %time,
        pass = %job.pass,
        iteration = job.iterations_left,
        object = %object.display_name(),
        result = %next,
        "Object synced"
    );

    if next < time {
        state.fail(SimulationError::StalledClock {
            object: object.id(),
            name: object.display_name(),
            time,
            result: next,
            pass: job.pass,
        });
        return;
    }

    if next == time {
        match job.iterations_left {
            2 => warn!(
                time = %time,
                object = %object.display_name(),
                "Iteration limit imminent"
            ),
            1 => warn!(
                time = %time,
                object = %object.display_name(),
                "Convergence iteration limit reached for object"
            ),
            _ => {}
        }
    }

    if next > time && !next.is_never() {
        next = next.round_up_to(settings.minimum_timestep);
    }
    state.step_to = state.step_to.min(next);
}

/// Returns the change and whether the callback ran
fn sync_in_service(object: &SimObject, job: &SyncJob, settings: &SyncSettings) -> Result<(NextChange, bool), String> {
    if settings.skipsafe > 0 && object.has_flags(ObjectFlags::SKIP_SAFE) {
        let safe_until = object
            .clock()
            .saturating_add(settings.skipsafe)
            .min(object.valid_to());
        if job.time < safe_until {
            return Ok((NextChange::At(safe_until), false));
        }
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        if object.take_recalc() {
            object.behavior().recalc(object);
        }
        object.behavior().sync(object, job.time, job.pass)
    }));

    let change = match outcome {
        Ok(Ok(change)) => change,
        Ok(Err(e)) => return Err(e.message().to_string()),
        Err(payload) => return Err(panic_message(payload.as_ref())),
    };

    object.record_valid_to(change.time());
    if object.passes().last_pass() == Some(job.pass) {
        object.record_clock(job.time);
    }
    Ok((change, true))
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

// ============================================================================
// Pass executor
// ============================================================================

/// Runs passes over the rank index, owning the bucket worker pools
pub struct PassExecutor {
    model: Arc<Model>,
    index: RankIndex,
    pools: Vec<Option<BucketPool>>,
    worker_count: usize,
    settings: Arc<SyncSettings>,
}

impl PassExecutor {
    /// `worker_count` of 1 keeps every bucket on the calling thread
    pub fn new(model: Arc<Model>, index: RankIndex, worker_count: usize, settings: SyncSettings) -> Self {
        let mut pools = Vec::new();
        pools.resize_with(index.bucket_count(), || None);
        Self {
            model,
            index,
            pools,
            worker_count: worker_count.max(1),
            settings: Arc::new(settings),
        }
    }

    pub fn index(&self) -> &RankIndex {
        &self.index
    }

    /// Threads started so far across all bucket pools
    pub fn worker_threads(&self) -> usize {
        self.pools.iter().flatten().map(|p| p.worker_count()).sum()
    }

    /// Run `job.pass` over every bucket, folding results into `state`
    ///
    /// # Errors
    /// The first failure of the first failing bucket, after that bucket has
    /// completed. Later buckets are not visited.
    pub fn run_pass(&mut self, job: SyncJob, state: &mut SyncState) -> Result<(), SimulationError> {
        let model = &self.model;
        let pools = &mut self.pools;

        for bucket in self.index.traverse(job.pass) {
            let outcome = if self.worker_count <= 1 || bucket.len() <= 1 {
                let mut local = SyncState::new();
                for &id in bucket.members.iter() {
                    evaluate_object(model.object(id)?, &job, &self.settings, &mut local);
                    if local.failure.is_some() {
                        break;
                    }
                }
                local
            } else {
                let pool = match pools[bucket.slot].take() {
                    Some(pool) => pool,
                    None => BucketPool::spawn(
                        bucket.slot,
                        Arc::clone(model),
                        Arc::clone(&bucket.members),
                        self.worker_count,
                        Arc::clone(&self.settings),
                    )?,
                };
                let outcome = pool.run(job);
                pools[bucket.slot] = Some(pool);
                outcome
            };

            state.merge(outcome);
            if let Some(failure) = state.failure.take() {
                return Err(failure);
            }
        }
        Ok(())
    }
}
