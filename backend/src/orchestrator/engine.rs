//! Executive - the convergence loop
//!
//! Drives every object to a self-consistent state at each simulated time and
//! then advances the clock:
//!
//! ```text
//! init_all (parents before children)
//! loop:
//!   1. Stop requested?                    -> Stopped
//!   2. clock = step_to; checkpoint if due
//!   3. First iteration of this timestep?  -> precommit_all(clock)
//!   4. Pre-top-down, bottom-up, post-top-down passes at clock
//!   5. step_to == clock?                  -> budget -= 1, 0 is non-convergence
//!   6. otherwise commit_all over [clock, step_to), next = min(step_to, commit)
//!      done when next is NEVER, or no hard events remain and next >= stop
//! finalize_all (always, failures only logged)
//! ```
//!
//! # Critical Invariants
//!
//! 1. **Strictly increasing clock**: every committed timestep lands later
//! 2. **Frozen schedule**: ranks and buckets are fixed once `Executive::new`
//!    returns
//! 3. **One run per executive**: all scheduler state lives here, so several
//!    executives can run side by side in one process
//!
//! # Example
//!
//! ```rust
//! use grid_simulator_core_rs::{
//!     CallbackError, ExecConfig, Executive, Model, NextChange, ObjectBehavior, ObjectBuilder,
//!     PassType, SimObject, Timestamp,
//! };
//!
//! /// Changes state every 15 minutes during the first hour
//! struct Thermostat;
//!
//! impl ObjectBehavior for Thermostat {
//!     fn sync(&self, _: &SimObject, t: Timestamp, _: PassType) -> Result<NextChange, CallbackError> {
//!         if t < Timestamp::from_secs(3600) {
//!             Ok(NextChange::At(t.saturating_add(900)))
//!         } else {
//!             Ok(NextChange::Never)
//!         }
//!     }
//! }
//!
//! let mut model = Model::new();
//! model.add(ObjectBuilder::new(Thermostat).name("tstat")).unwrap();
//!
//! let config = ExecConfig {
//!     stop_time: Timestamp::from_secs(3600),
//!     thread_count: 1,
//!     ..Default::default()
//! };
//! let mut executive = Executive::new(model, config).unwrap();
//! let summary = executive.run().unwrap();
//!
//! assert_eq!(summary.timesteps, 5);
//! assert_eq!(summary.final_time, Timestamp::from_secs(3600));
//! ```

use crate::core::time::{TimeManager, Timestamp};
use crate::events::{ExecObserver, TimestepReport};
use crate::models::model::Model;
use crate::models::object::PassType;
use crate::orchestrator::checkpoint::{compute_config_hash, CheckpointWriter};
use crate::orchestrator::config::ExecConfig;
use crate::orchestrator::lifecycle::{commit_all, finalize_all, init_all, precommit_all, FinalizeFailure};
use crate::orchestrator::SimulationError;
use crate::rng::RngManager;
use crate::scheduler::pass::{PassExecutor, SyncJob, SyncSettings, SyncState};
use crate::scheduler::rank::assign_ranks;
use crate::scheduler::rank_index::RankIndex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

// ============================================================================
// Run control and results
// ============================================================================

/// Requests an orderly stop from any thread
///
/// The request is seen at the next outer-loop boundary; the current
/// iteration always completes.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a successful run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No further work before the stop time
    Completed,
    /// A stop was requested through a [`StopHandle`]
    Stopped,
}

/// Run profile
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Convergence iterations (each runs all three passes)
    pub passes: u64,

    /// Committed timesteps
    pub timesteps: u64,

    /// Object evaluations across all passes
    pub objects_synced: u64,

    pub wall_time: Duration,

    /// Global clock when the loop exited
    pub final_time: Timestamp,

    /// Worker threads started over the run
    pub worker_threads: usize,

    pub stop_reason: StopReason,

    pub finalize_failures: Vec<FinalizeFailure>,
}

impl RunSummary {
    /// Iterations per committed timestep (1.0 means every timestep converged at once)
    pub fn convergence_efficiency(&self) -> f64 {
        if self.timesteps == 0 {
            return 0.0;
        }
        self.passes as f64 / self.timesteps as f64
    }
}

#[derive(Debug, Default)]
struct Profile {
    passes: u64,
    timesteps: u64,
    objects_synced: u64,
    final_time: Timestamp,
}

// ============================================================================
// Executive
// ============================================================================

/// Owns one run: the frozen model, its rank index, worker pools and clock
pub struct Executive {
    /// Frozen object set
    model: Arc<Model>,

    /// Validated run configuration
    config: ExecConfig,

    /// Buckets and worker pools
    executor: PassExecutor,

    /// Present when checkpoints are enabled
    checkpoints: Option<CheckpointWriter>,

    observer: Option<Arc<dyn ExecObserver>>,

    stop: StopHandle,

    /// Set once `run` has been called
    started: bool,
}

impl Executive {
    /// Validate the config, finalise ranks and build the rank index
    ///
    /// # Errors
    ///
    /// * `InvalidConfig` - configuration rejected
    /// * `ParentCycle` - parent or dependency edges loop
    pub fn new(mut model: Model, config: ExecConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        assign_ranks(&mut model)?;

        let mut rng = config.shuffle_buckets.then(|| RngManager::new(config.rng_seed));
        let index = RankIndex::build(&model, rng.as_mut());

        let config_hash = compute_config_hash(&config)
            .map_err(|e| SimulationError::InvalidConfig(format!("Config hashing failed: {}", e)))?;
        let checkpoints = CheckpointWriter::new(&config.checkpoint, config_hash);

        let model = Arc::new(model);
        let settings = SyncSettings {
            minimum_timestep: config.minimum_timestep,
            skipsafe: config.skipsafe,
            stop_time: config.stop_time,
        };
        let executor = PassExecutor::new(Arc::clone(&model), index, config.effective_threads(), settings);

        Ok(Self {
            model,
            config,
            executor,
            checkpoints,
            observer: None,
            stop: StopHandle::new(),
            started: false,
        })
    }

    /// Attach an observer for timestep, checkpoint and completion notices
    pub fn with_observer(mut self, observer: Arc<dyn ExecObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Handle that stops this run from any thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Shared handle to the model, usable after the executive is gone
    pub fn model_handle(&self) -> Arc<Model> {
        Arc::clone(&self.model)
    }

    pub fn rank_index(&self) -> &RankIndex {
        self.executor.index()
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Run the simulation to completion
    ///
    /// `finalize` runs on every object once the loop has exited, whether it
    /// succeeded or failed. A failure before the loop starts (init) skips it.
    pub fn run(&mut self) -> Result<RunSummary, SimulationError> {
        if self.started {
            return Err(SimulationError::InvalidConfig(
                "executive has already run".to_string(),
            ));
        }
        self.started = true;

        let wall_start = Instant::now();
        info!(
            objects = self.model.len(),
            buckets = self.executor.index().bucket_count(),
            threads = self.config.effective_threads(),
            start = %self.config.start_time,
            stop = %self.config.stop_time,
            "Starting simulation"
        );

        let mut profile = Profile {
            final_time: self.config.start_time,
            ..Default::default()
        };

        let (stop_reason, finalize_failures) = if self.model.is_empty() {
            (StopReason::Completed, Vec::new())
        } else {
            if let Err(e) = init_all(&self.model) {
                error!(error = %e, "Initialization failed");
                return Err(e);
            }
            let outcome = self.converge(&mut profile, wall_start);
            let failures = finalize_all(&self.model);
            match outcome {
                Ok(reason) => (reason, failures),
                Err(e) => {
                    error!(
                        error = %e,
                        time = %profile.final_time,
                        exit_code = e.exit_code(),
                        "Simulation failed"
                    );
                    return Err(e);
                }
            }
        };

        let summary = RunSummary {
            passes: profile.passes,
            timesteps: profile.timesteps,
            objects_synced: profile.objects_synced,
            wall_time: wall_start.elapsed(),
            final_time: profile.final_time,
            worker_threads: self.executor.worker_threads(),
            stop_reason,
            finalize_failures,
        };

        info!(
            passes = summary.passes,
            timesteps = summary.timesteps,
            objects_synced = summary.objects_synced,
            efficiency = summary.convergence_efficiency(),
            wall_ms = summary.wall_time.as_millis() as u64,
            final_time = %summary.final_time,
            worker_threads = summary.worker_threads,
            reason = ?summary.stop_reason,
            "Simulation complete"
        );

        if let Some(observer) = &self.observer {
            observer.on_run_complete(&summary);
        }
        Ok(summary)
    }

    // ========================================================================
    // Convergence loop
    // ========================================================================

    fn converge(&mut self, profile: &mut Profile, wall_start: Instant) -> Result<StopReason, SimulationError> {
        let limit = self.config.iteration_limit;
        let stop = self.config.stop_time;
        let mut time = TimeManager::new(self.config.start_time, stop);
        let mut step_to = time.current();
        let mut iterations_left = limit;
        let mut new_timestep = true;

        loop {
            if self.stop.is_stop_requested() {
                info!(time = %time.current(), "Stop requested");
                return Ok(StopReason::Stopped);
            }

            if step_to != time.current() {
                time.advance_to(step_to)?;
            }
            let clock = time.current();
            profile.final_time = clock;

            if let Some(writer) = self.checkpoints.as_mut() {
                let wall_secs = wall_start.elapsed().as_secs() as i64;
                if let Some((sequence, path)) = writer.poll(&self.model, clock, wall_secs) {
                    if let Some(observer) = &self.observer {
                        observer.on_checkpoint(sequence, clock, &path);
                    }
                }
            }

            if new_timestep {
                precommit_all(&self.model, clock)?;
                new_timestep = false;
            }

            let mut state = SyncState::new();
            for pass in PassType::ALL {
                let job = SyncJob {
                    time: clock,
                    pass,
                    iterations_left,
                };
                self.executor.run_pass(job, &mut state)?;
            }
            profile.passes += 1;
            profile.objects_synced += state.objects_synced;

            debug!(
                time = %clock,
                step_to = %state.step_to,
                hard_events = state.hard_events,
                iterations_left,
                "Convergence iteration"
            );

            if state.step_to == clock {
                iterations_left -= 1;
                if iterations_left == 0 {
                    return Err(SimulationError::NonConvergence {
                        time: clock,
                        iterations: limit,
                    });
                }
                continue;
            }

            let commit = commit_all(&self.model, clock, state.step_to)?;
            let next = state.step_to.min(commit);
            profile.timesteps += 1;

            let report = TimestepReport {
                time: clock,
                next_time: next,
                iterations: limit - iterations_left + 1,
                hard_events: state.hard_events,
            };
            debug!(
                time = %clock,
                next = %next,
                iterations = report.iterations,
                "Timestep committed"
            );
            if let Some(observer) = &self.observer {
                observer.on_timestep(&report);
            }

            if next.is_never() || (state.hard_events == 0 && (next >= stop || stop.is_never())) {
                return Ok(StopReason::Completed);
            }

            step_to = next;
            iterations_left = limit;
            new_timestep = true;
        }
    }
}

impl std::fmt::Debug for Executive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executive")
            .field("objects", &self.model.len())
            .field("buckets", &self.executor.index().bucket_count())
            .field("config", &self.config)
            .field("started", &self.started)
            .finish()
    }
}
