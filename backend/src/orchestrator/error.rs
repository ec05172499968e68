//! Error taxonomy for the execution kernel
//!
//! Every fatal cause of a run maps to one variant. Variants about a specific
//! object carry its id and display name so a failure can be traced back to the
//! model without consulting logs.

use crate::core::time::Timestamp;
use crate::models::object::{ObjectId, PassType};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// Configuration validation error
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Unknown object {0}")]
    UnknownObject(ObjectId),

    /// An object named as its own parent or dependency
    #[error("Object {name} ({object}) cannot reference itself")]
    SelfReference { object: ObjectId, name: String },

    /// Rank assignment came back to an object it was already visiting
    #[error("Parent cycle detected at object {name} ({object})")]
    ParentCycle { object: ObjectId, name: String },

    #[error("Init failed for object {name} ({object}): {message}")]
    InitFailed {
        object: ObjectId,
        name: String,
        message: String,
    },

    #[error("Precommit failed for object {name} ({object}) at {time}: {message}")]
    PrecommitFailed {
        object: ObjectId,
        name: String,
        time: Timestamp,
        message: String,
    },

    /// Sync returned a time earlier than the one it was asked to reach
    #[error("Object {name} ({object}) stopped the clock in {pass} at {time} (returned {result})")]
    StalledClock {
        object: ObjectId,
        name: String,
        time: Timestamp,
        result: Timestamp,
        pass: PassType,
    },

    /// Sync callback returned an error or panicked
    #[error("Sync failed for object {name} ({object}) in {pass} at {time}: {message}")]
    SyncFailed {
        object: ObjectId,
        name: String,
        time: Timestamp,
        pass: PassType,
        message: String,
    },

    #[error("No convergence at {time} after {iterations} iterations")]
    NonConvergence { time: Timestamp, iterations: u32 },

    /// Commit returned an error or a time not later than the committed step
    #[error("Commit failed for object {name} ({object}) at {time}: {message}")]
    CommitFailed {
        object: ObjectId,
        name: String,
        time: Timestamp,
        message: String,
    },

    #[error("Failed to start worker thread: {0}")]
    WorkerSpawn(String),

    #[error("Clock cannot move from {current} to {requested}")]
    ClockRegression {
        current: Timestamp,
        requested: Timestamp,
    },
}

impl SimulationError {
    /// Process exit status for this failure class
    ///
    /// # Example
    /// ```
    /// use grid_simulator_core_rs::{SimulationError, Timestamp};
    ///
    /// let err = SimulationError::NonConvergence { time: Timestamp::from_secs(60), iterations: 100 };
    /// assert_eq!(err.exit_code(), 6);
    /// ```
    pub fn exit_code(&self) -> i32 {
        match self {
            SimulationError::InvalidConfig(_)
            | SimulationError::UnknownObject(_)
            | SimulationError::SelfReference { .. }
            | SimulationError::ParentCycle { .. } => 2,
            SimulationError::InitFailed { .. } => 3,
            SimulationError::PrecommitFailed { .. } => 4,
            SimulationError::StalledClock { .. } | SimulationError::SyncFailed { .. } => 5,
            SimulationError::NonConvergence { .. } => 6,
            SimulationError::CommitFailed { .. } => 7,
            SimulationError::WorkerSpawn(_) | SimulationError::ClockRegression { .. } => 8,
        }
    }

    /// Object the failure is attributed to, if any
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            SimulationError::UnknownObject(object)
            | SimulationError::SelfReference { object, .. }
            | SimulationError::ParentCycle { object, .. }
            | SimulationError::InitFailed { object, .. }
            | SimulationError::PrecommitFailed { object, .. }
            | SimulationError::StalledClock { object, .. }
            | SimulationError::SyncFailed { object, .. }
            | SimulationError::CommitFailed { object, .. } => Some(*object),
            _ => None,
        }
    }
}
