//! Lifecycle hooks around the convergence loop
//!
//! ```text
//! init_all        once, ascending rank (parents before children), fatal on failure
//! precommit_all   once per timestep, before its first pass, in-service objects only
//! commit_all      once per resolved timestep [t0, t1), every object
//! finalize_all    once after the loop, every object, failures only logged
//! ```
//!
//! These hooks run on the coordinator thread. Panics inside a callback are
//! caught and reported like an ordinary callback error.

use crate::core::time::Timestamp;
use crate::models::behavior::CallbackError;
use crate::models::model::Model;
use crate::models::object::{ObjectId, SimObject};
use crate::orchestrator::SimulationError;
use crate::scheduler::pass::panic_message;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error};

fn guarded<T>(call: impl FnOnce() -> Result<T, CallbackError>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.message().to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

/// Initialise every object, parents first
pub fn init_all(model: &Model) -> Result<(), SimulationError> {
    debug!(objects = model.len(), "Initializing objects");
    for id in model.ids_by_rank() {
        let object = model.object(id)?;
        let parent = object.parent().and_then(|p| model.get(p));
        guarded(|| object.behavior().init(object, parent)).map_err(|message| {
            error!(object = %object.display_name(), error = %message, "Init failed");
            SimulationError::InitFailed {
                object: id,
                name: object.display_name(),
                message,
            }
        })?;
    }
    Ok(())
}

/// Run precommit on every object in service at `time`
pub fn precommit_all(model: &Model, time: Timestamp) -> Result<(), SimulationError> {
    for object in model.iter().filter(|o| o.service().is_active(time)) {
        guarded(|| object.behavior().precommit(object, time)).map_err(|message| {
            error!(object = %object.display_name(), time = %time, error = %message, "Precommit failed");
            SimulationError::PrecommitFailed {
                object: object.id(),
                name: object.display_name(),
                time,
                message,
            }
        })?;
    }
    Ok(())
}

/// Commit the timestep `[t0, t1)` on every object
///
/// Returns the earliest next-commit time requested. A result not later than
/// `t0` is a commit failure.
pub fn commit_all(model: &Model, t0: Timestamp, t1: Timestamp) -> Result<Timestamp, SimulationError> {
    let mut next = Timestamp::NEVER;
    for object in model.iter() {
        let result = guarded(|| object.behavior().commit(object, t0, t1))
            .and_then(|t| {
                if t <= t0 {
                    Err(format!("returned {} which is not after {}", t, t0))
                } else {
                    Ok(t)
                }
            })
            .map_err(|message| commit_failure(object, t0, message))?;
        next = next.min(result);
    }
    Ok(next)
}

fn commit_failure(object: &SimObject, time: Timestamp, message: String) -> SimulationError {
    error!(object = %object.display_name(), time = %time, error = %message, "Commit failed");
    SimulationError::CommitFailed {
        object: object.id(),
        name: object.display_name(),
        time,
        message,
    }
}

/// A finalize callback that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeFailure {
    pub object: ObjectId,
    pub name: String,
    pub message: String,
}

/// Finalize every object; failures are logged and returned, never raised
pub fn finalize_all(model: &Model) -> Vec<FinalizeFailure> {
    let mut failures = Vec::new();
    for object in model.iter() {
        if let Err(message) = guarded(|| object.behavior().finalize(object)) {
            error!(object = %object.display_name(), error = %message, "Finalize failed");
            failures.push(FinalizeFailure {
                object: object.id(),
                name: object.display_name(),
                message,
            });
        }
    }
    failures
}
