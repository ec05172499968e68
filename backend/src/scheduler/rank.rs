//! Rank assignment
//!
//! Ranks order objects within each pass. A child always ranks strictly above
//! its parent, and a dependent strictly above each of its dependencies, so the
//! bottom-up pass (ascending rank) reaches parents before children and the
//! top-down passes (descending rank) reach children first.
//!
//! # Critical Invariants
//!
//! 1. **Monotonic**: assignment only ever raises a rank
//! 2. **Cycle safety**: a transient `RERANK` flag marks every object on the
//!    current recursion path; coming back to a flagged object is a
//!    `ParentCycle` error, and the flag is cleared on every return path
//! 3. **Explicit ranks in range**: a rank requested by the caller (builder or
//!    `set_rank` minimum) must be below the object count; derived ranks may
//!    exceed it
//!
//! # Example
//! ```
//! use grid_simulator_core_rs::scheduler::rank::{assign_ranks, set_parent};
//! use grid_simulator_core_rs::{
//!     CallbackError, Model, NextChange, ObjectBehavior, ObjectBuilder, PassType, SimObject,
//!     Timestamp,
//! };
//!
//! struct Bus;
//!
//! impl ObjectBehavior for Bus {
//!     fn sync(&self, _: &SimObject, _: Timestamp, _: PassType) -> Result<NextChange, CallbackError> {
//!         Ok(NextChange::Never)
//!     }
//! }
//!
//! let mut model = Model::new();
//! let feeder = model.add(ObjectBuilder::new(Bus)).unwrap();
//! let node = model.add(ObjectBuilder::new(Bus)).unwrap();
//! let load = model.add(ObjectBuilder::new(Bus)).unwrap();
//! set_parent(&mut model, node, feeder).unwrap();
//! set_parent(&mut model, load, node).unwrap();
//! assign_ranks(&mut model).unwrap();
//!
//! let rank = |id| model.get(id).unwrap().rank();
//! assert!(rank(feeder) < rank(node) && rank(node) < rank(load));
//! assert!(set_parent(&mut model, feeder, load).is_err());
//! ```

use crate::models::model::Model;
use crate::models::object::{ObjectFlags, ObjectId, Rank};
use crate::orchestrator::SimulationError;

/// Raise `id` so that its rank is at least `minimum + 1` and above its parent
///
/// Recurses onto the parent and recorded dependencies first. Returns the
/// object's resulting rank. Children of `id` are not revisited; run
/// [`assign_ranks`] once the model is complete.
///
/// # Errors
/// `ParentCycle` when the parent/dependency chain loops back, `UnknownObject`
/// for a dangling id, `InvalidConfig` when `minimum` is not below the object
/// count.
pub fn set_rank(model: &mut Model, id: ObjectId, minimum: Option<Rank>) -> Result<Rank, SimulationError> {
    if let Some(minimum) = minimum {
        if minimum as usize >= model.len() {
            return Err(SimulationError::InvalidConfig(format!(
                "rank {} requested for {} exceeds the object count {}",
                minimum,
                display_name(model, id),
                model.len()
            )));
        }
    }
    let mut settled = vec![false; model.len()];
    raise(model, id, minimum, &mut settled)
}

/// Make `parent` the structural parent of `child`
///
/// The link is rolled back when it would close a cycle.
pub fn set_parent(model: &mut Model, child: ObjectId, parent: ObjectId) -> Result<(), SimulationError> {
    if child == parent {
        return Err(self_reference(model, child));
    }
    model.object(parent)?;
    let previous = model.get_mut(child)?.parent();
    model.get_mut(child)?.set_parent(Some(parent));

    if let Err(e) = set_rank(model, child, None) {
        model.get_mut(child)?.set_parent(previous);
        return Err(e);
    }
    Ok(())
}

/// Require `dependent` to rank above `dependency` without a parent link
///
/// The edge is recorded on the dependent, so later rank changes of the
/// dependency are picked up by [`assign_ranks`].
pub fn set_dependent(
    model: &mut Model,
    dependency: ObjectId,
    dependent: ObjectId,
) -> Result<(), SimulationError> {
    if dependency == dependent {
        return Err(self_reference(model, dependent));
    }
    model.object(dependency)?;
    let existed = model.object(dependent)?.dependencies().contains(&dependency);
    model.get_mut(dependent)?.add_dependency(dependency);

    if let Err(e) = set_rank(model, dependent, None) {
        if !existed {
            model.get_mut(dependent)?.remove_dependency(dependency);
        }
        return Err(e);
    }
    Ok(())
}

/// Final rank pass over every object
///
/// After this returns, every parent and dependency edge satisfies
/// `rank(child) > rank(parent)`. Each object is resolved once.
///
/// # Errors
/// `InvalidConfig` for a builder rank not below the object count,
/// `ParentCycle` when edges loop.
pub fn assign_ranks(model: &mut Model) -> Result<(), SimulationError> {
    if let Some(object) = model.iter().find(|o| o.requested_rank() as usize >= model.len()) {
        return Err(SimulationError::InvalidConfig(format!(
            "rank {} requested for {} exceeds the object count {}",
            object.requested_rank(),
            object.display_name(),
            model.len()
        )));
    }
    let mut settled = vec![false; model.len()];
    for index in 0..model.len() {
        raise(model, ObjectId(index), None, &mut settled)?;
    }
    Ok(())
}

fn raise(
    model: &mut Model,
    id: ObjectId,
    minimum: Option<Rank>,
    settled: &mut [bool],
) -> Result<Rank, SimulationError> {
    let object = model.object(id)?;
    if object.has_flags(ObjectFlags::RERANK) {
        return Err(cycle(model, id));
    }
    if minimum.is_none() && settled[id.index()] {
        return Ok(object.rank());
    }

    let current = object.rank();
    let predecessors: Vec<ObjectId> = object.parent().into_iter().chain(object.dependencies().iter().copied()).collect();
    object.set_flags(ObjectFlags::RERANK);

    let result = required_rank(model, current, minimum, &predecessors, settled);

    let object = model.get_mut(id)?;
    object.clear_flags(ObjectFlags::RERANK);
    let rank = result?;
    object.set_rank(rank);
    settled[id.index()] = true;
    Ok(rank)
}

fn required_rank(
    model: &mut Model,
    current: Rank,
    minimum: Option<Rank>,
    predecessors: &[ObjectId],
    settled: &mut [bool],
) -> Result<Rank, SimulationError> {
    let mut rank = current;
    if let Some(minimum) = minimum {
        rank = rank.max(minimum.saturating_add(1));
    }
    for &pred in predecessors {
        let pred_rank = raise(model, pred, None, settled)?;
        rank = rank.max(pred_rank.saturating_add(1));
    }
    Ok(rank)
}

fn cycle(model: &Model, id: ObjectId) -> SimulationError {
    SimulationError::ParentCycle {
        object: id,
        name: display_name(model, id),
    }
}

fn self_reference(model: &Model, id: ObjectId) -> SimulationError {
    SimulationError::SelfReference {
        object: id,
        name: display_name(model, id),
    }
}

fn display_name(model: &Model, id: ObjectId) -> String {
    model
        .get(id)
        .map(|o| o.display_name())
        .unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::Timestamp;
    use crate::models::behavior::{CallbackError, NextChange, ObjectBehavior};
    use crate::models::object::{ObjectBuilder, PassType, SimObject};

    struct Idle;

    impl ObjectBehavior for Idle {
        fn sync(&self, _: &SimObject, _: Timestamp, _: PassType) -> Result<NextChange, CallbackError> {
            Ok(NextChange::Never)
        }
    }

    fn model_with(n: usize) -> Model {
        let mut model = Model::new();
        for _ in 0..n {
            model.add(ObjectBuilder::new(Idle)).unwrap();
        }
        model
    }

    #[test]
    fn test_set_rank_respects_minimum() {
        let mut model = model_with(5);
        assert_eq!(set_rank(&mut model, ObjectId(0), Some(2)).unwrap(), 3);
        // never lowers
        assert_eq!(set_rank(&mut model, ObjectId(0), Some(0)).unwrap(), 3);
    }

    #[test]
    fn test_flag_cleared_after_cycle_error() {
        let mut model = model_with(2);
        set_parent(&mut model, ObjectId(1), ObjectId(0)).unwrap();
        assert!(set_parent(&mut model, ObjectId(0), ObjectId(1)).is_err());
        for object in model.iter() {
            assert!(!object.has_flags(ObjectFlags::RERANK));
        }
        assert_eq!(model.get(ObjectId(0)).unwrap().parent(), None);
    }

    #[test]
    fn test_minimum_beyond_object_count_rejected() {
        let mut model = model_with(3);
        let err = set_rank(&mut model, ObjectId(1), Some(5)).unwrap_err();
        assert!(matches!(err, SimulationError::InvalidConfig(_)));
        assert_eq!(model.get(ObjectId(1)).unwrap().rank(), 0);
    }
}
