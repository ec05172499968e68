//! Domain models for the execution kernel

pub mod behavior;
pub mod lock;
pub mod model;
pub mod object;

// Re-exports
pub use behavior::{CallbackError, NextChange, ObjectBehavior};
pub use lock::{LockStats, ObjectLock, ObjectLockGuard};
pub use model::Model;
pub use object::{
    ObjectBuilder, ObjectFlags, ObjectId, PassSet, PassType, Rank, ServiceStatus, ServiceWindow,
    SimObject, Traversal,
};
