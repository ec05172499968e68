//! Run configuration
//!
//! Every field has a default, so a config file only needs to name what it
//! changes. Validation runs when the executive is built.
//!
//! # Example
//! ```
//! use grid_simulator_core_rs::{CheckpointMode, ExecConfig, Timestamp};
//!
//! let config = ExecConfig::from_json_str(r#"{
//!     "stop_time": 86400,
//!     "thread_count": 4,
//!     "checkpoint": { "mode": "simulated", "file_base": "run" }
//! }"#).unwrap();
//!
//! assert_eq!(config.stop_time, Timestamp::from_secs(86400));
//! assert_eq!(config.iteration_limit, 100);
//! assert_eq!(config.checkpoint.mode, CheckpointMode::Simulated);
//! assert_eq!(config.checkpoint.effective_interval(), 86400);
//! ```

use crate::core::time::Timestamp;
use crate::orchestrator::SimulationError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::thread;

// ============================================================================
// Configuration Types
// ============================================================================

/// Complete executive configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Global clock at the start of the run
    pub start_time: Timestamp,

    /// Stop time (`NEVER` runs until no hard events remain)
    pub stop_time: Timestamp,

    /// Convergence iterations allowed per timestep
    pub iteration_limit: u32,

    /// Worker threads per bucket (0 = available parallelism)
    pub thread_count: usize,

    /// Quantum next-change times are rounded up to (values <= 1 disable it)
    pub minimum_timestep: i64,

    /// Skip-safe window in seconds (0 disables skipping)
    pub skipsafe: i64,

    /// Shuffle bucket members once when the rank index is built
    pub shuffle_buckets: bool,

    /// Seed for the bucket shuffle
    pub rng_seed: u64,

    /// Run every bucket on the coordinator thread
    pub debug_mode: bool,

    pub checkpoint: CheckpointConfig,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            start_time: Timestamp::ZERO,
            stop_time: Timestamp::NEVER,
            iteration_limit: 100,
            thread_count: 0,
            minimum_timestep: 1,
            skipsafe: 0,
            shuffle_buckets: false,
            rng_seed: 0,
            debug_mode: false,
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl ExecConfig {
    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, SimulationError> {
        serde_json::from_str(json)
            .map_err(|e| SimulationError::InvalidConfig(format!("Config parse failed: {}", e)))
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.iteration_limit == 0 {
            return Err(SimulationError::InvalidConfig(
                "iteration_limit must be > 0".to_string(),
            ));
        }

        if self.stop_time < self.start_time {
            return Err(SimulationError::InvalidConfig(format!(
                "stop_time {} is before start_time {}",
                self.stop_time, self.start_time
            )));
        }

        if self.start_time.is_never() {
            return Err(SimulationError::InvalidConfig(
                "start_time cannot be NEVER".to_string(),
            ));
        }

        if self.minimum_timestep < 0 {
            return Err(SimulationError::InvalidConfig(
                "minimum_timestep must be >= 0".to_string(),
            ));
        }

        if self.skipsafe < 0 {
            return Err(SimulationError::InvalidConfig(
                "skipsafe must be >= 0".to_string(),
            ));
        }

        if self.checkpoint.mode != CheckpointMode::None
            && self.checkpoint.file_base.as_os_str().is_empty()
        {
            return Err(SimulationError::InvalidConfig(
                "checkpoint.file_base must be set when checkpoints are enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Threads each bucket may use
    ///
    /// Debug mode forces one; 0 resolves to the machine's available parallelism.
    pub fn effective_threads(&self) -> usize {
        if self.debug_mode {
            return 1;
        }
        match self.thread_count {
            0 => thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            n => n,
        }
    }
}

/// When checkpoints are taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    #[default]
    None,
    /// Interval measured in wall-clock seconds
    WallClock,
    /// Interval measured in simulated seconds
    Simulated,
}

/// Checkpoint cadence and file naming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub mode: CheckpointMode,

    /// Seconds between checkpoints (0 = mode default)
    pub interval: i64,

    /// Files are written as `<file_base>.<seq>`
    pub file_base: PathBuf,

    /// Keep every file instead of only the latest
    pub keep_all: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            mode: CheckpointMode::None,
            interval: 0,
            file_base: PathBuf::new(),
            keep_all: false,
        }
    }
}

impl CheckpointConfig {
    pub const DEFAULT_WALL_INTERVAL: i64 = 3600;
    pub const DEFAULT_SIM_INTERVAL: i64 = 86400;

    /// Interval in seconds with the mode default applied
    pub fn effective_interval(&self) -> i64 {
        match (self.mode, self.interval) {
            (CheckpointMode::WallClock, i) if i <= 0 => Self::DEFAULT_WALL_INTERVAL,
            (CheckpointMode::Simulated, i) if i <= 0 => Self::DEFAULT_SIM_INTERVAL,
            (_, i) => i,
        }
    }
}
