//! Orchestrator - the run driver
//!
//! - **config**: run configuration and validation
//! - **engine**: the executive and its convergence loop
//! - **lifecycle**: init / precommit / commit / finalize over all objects
//! - **checkpoint**: periodic snapshots of object state
//! - **error**: the error taxonomy shared by every layer

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;

// Re-export main types for convenience
pub use config::{CheckpointConfig, CheckpointMode, ExecConfig};
pub use engine::{Executive, RunSummary, StopHandle, StopReason};
pub use error::SimulationError;
pub use lifecycle::FinalizeFailure;

// Re-export checkpoint types
pub use checkpoint::{load_checkpoint, Checkpoint, CheckpointError, CheckpointHeader, ObjectSnapshot};
