//! Object behaviour (capability) interface
//!
//! Every simulated object type implements [`ObjectBehavior`]. The executive
//! calls it at exactly five points of the lifecycle: `init` once before the
//! run, `sync` once per participating pass per convergence iteration,
//! `precommit` once per timestep, `commit` once per resolved timestep and
//! `finalize` once after the loop exits.
//!
//! Behaviours are shared between worker threads, so they take `&self` and keep
//! mutable state behind interior mutability. When several objects write to the
//! same state in one pass, the writer takes the target object's
//! [`ObjectLock`](crate::models::lock::ObjectLock).

use crate::core::time::Timestamp;
use crate::models::object::{PassType, SimObject};
use thiserror::Error;

/// Failure reported by an object callback
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallbackError(String);

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        CallbackError(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Next time an object expects its state to change
///
/// # Example
/// ```
/// use grid_simulator_core_rs::{NextChange, Timestamp};
///
/// assert_eq!(NextChange::from_raw(-120), Some(NextChange::Soft(Timestamp::from_secs(120))));
/// assert_eq!(NextChange::from_raw(i64::MAX), Some(NextChange::Never));
/// assert_eq!(NextChange::from_raw(-1), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextChange {
    /// A hard event: blocks termination until it has been processed
    At(Timestamp),

    /// A soft event: scheduled, but never keeps the run alive on its own
    Soft(Timestamp),

    /// Nothing further expected
    Never,
}

impl NextChange {
    /// Decode the signed wire convention used by external models
    ///
    /// Negative values below -1 are soft events at the negated time,
    /// `i64::MAX` is "never", and -1 is the invalid sentinel (`None`).
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            -1 => None,
            i64::MAX => Some(NextChange::Never),
            r if r < -1 => Some(NextChange::Soft(Timestamp::from_secs(-r))),
            r => Some(NextChange::At(Timestamp::from_secs(r))),
        }
    }

    /// The scheduled time, `NEVER` for [`NextChange::Never`]
    pub fn time(self) -> Timestamp {
        match self {
            NextChange::At(t) | NextChange::Soft(t) => t,
            NextChange::Never => Timestamp::NEVER,
        }
    }

    /// Whether this change counts towards the hard-event total
    pub fn is_hard(self) -> bool {
        matches!(self, NextChange::At(t) if !t.is_never())
    }
}

/// Capability table every object type provides
///
/// Only `sync` is mandatory; the other hooks default to success and `commit`
/// defaults to "no recommit needed".
pub trait ObjectBehavior: Send + Sync {
    /// Type name used in diagnostics when the object has no name
    fn kind(&self) -> &str {
        "object"
    }

    /// Called once before the first pass, parents before children
    fn init(&self, _object: &SimObject, _parent: Option<&SimObject>) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Synchronise the object to `time` for one pass
    fn sync(
        &self,
        object: &SimObject,
        time: Timestamp,
        pass: PassType,
    ) -> Result<NextChange, CallbackError>;

    /// Called once at the start of every timestep, before the first pass
    fn precommit(&self, _object: &SimObject, _time: Timestamp) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Called once the timestep `[t0, t1)` is resolved
    ///
    /// Returns the next time the object needs a commit; it must be later than `t0`.
    fn commit(
        &self,
        _object: &SimObject,
        _t0: Timestamp,
        _t1: Timestamp,
    ) -> Result<Timestamp, CallbackError> {
        Ok(Timestamp::NEVER)
    }

    /// Called once after the loop exits, whatever the outcome
    fn finalize(&self, _object: &SimObject) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Recompute derived state; runs before the next sync when `RECALC` is set
    fn recalc(&self, _object: &SimObject) {}

    /// Published attributes written into checkpoints
    fn publish(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_positive_is_hard() {
        let change = NextChange::from_raw(300).unwrap();
        assert_eq!(change, NextChange::At(Timestamp::from_secs(300)));
        assert!(change.is_hard());
    }

    #[test]
    fn test_soft_and_never_are_not_hard() {
        assert!(!NextChange::Soft(Timestamp::from_secs(5)).is_hard());
        assert!(!NextChange::Never.is_hard());
        assert!(!NextChange::At(Timestamp::NEVER).is_hard());
    }

    #[test]
    fn test_never_time() {
        assert_eq!(NextChange::Never.time(), Timestamp::NEVER);
    }
}
