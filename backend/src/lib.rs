//! Grid Simulator Core - execution kernel
//!
//! Rank-ordered, three-pass fixed-point scheduler for agent-based
//! physical-network simulations. Each object exposes lifecycle callbacks; the
//! executive drives all objects to a self-consistent state at each simulated
//! time and then advances the clock.
//!
//! # Architecture
//!
//! - **core**: Simulated time
//! - **models**: Objects, behaviours, per-object locks, the model registry
//! - **scheduler**: Rank assignment, rank index, pass executor, worker pools
//! - **orchestrator**: Configuration, convergence loop, lifecycle hooks, checkpoints
//! - **events**: Run observers
//! - **rng**: Deterministic bucket shuffling
//!
//! # Critical Invariants
//!
//! 1. `rank(child) > rank(parent)` for every parent and dependency edge
//! 2. Global time strictly increases across committed timesteps
//! 3. Results do not depend on the number of worker threads
//!
//! The library never installs a `tracing` subscriber; applications choose one.

// Module declarations
pub mod core;
pub mod events;
pub mod models;
pub mod orchestrator;
pub mod rng;
pub mod scheduler;

// Re-exports for convenience
pub use core::time::{TimeManager, Timestamp};
pub use events::{EventLog, ExecEvent, ExecObserver, TimestepReport};
pub use models::{
    behavior::{CallbackError, NextChange, ObjectBehavior},
    lock::{ObjectLock, ObjectLockGuard},
    model::Model,
    object::{ObjectBuilder, ObjectFlags, ObjectId, PassSet, PassType, Rank, ServiceWindow, SimObject},
};
pub use orchestrator::{
    CheckpointConfig, CheckpointMode, ExecConfig, Executive, FinalizeFailure, RunSummary,
    SimulationError, StopHandle, StopReason,
};
pub use rng::RngManager;
pub use scheduler::{set_dependent, set_parent, set_rank};
