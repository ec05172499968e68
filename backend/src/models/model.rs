//! Object registry
//!
//! The `Model` owns every [`SimObject`] of a run. Objects are addressed by
//! [`ObjectId`], which is their position in insertion order. The model is
//! mutable while it is being loaded (objects added, parents and dependencies
//! linked) and frozen behind an `Arc` once the executive takes it over.

use crate::models::object::{ObjectBuilder, ObjectId, Rank, SimObject};
use crate::orchestrator::SimulationError;
use std::collections::HashMap;

/// All objects of one simulation
#[derive(Debug, Default)]
pub struct Model {
    objects: Vec<SimObject>,
    by_name: HashMap<String, ObjectId>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object, returning its id
    ///
    /// # Errors
    /// `InvalidConfig` when another object already uses the same name.
    ///
    /// # Example
    /// ```
    /// use grid_simulator_core_rs::{
    ///     CallbackError, Model, NextChange, ObjectBehavior, ObjectBuilder, PassType, SimObject,
    ///     Timestamp,
    /// };
    ///
    /// struct Meter;
    ///
    /// impl ObjectBehavior for Meter {
    ///     fn sync(&self, _: &SimObject, _: Timestamp, _: PassType) -> Result<NextChange, CallbackError> {
    ///         Ok(NextChange::Never)
    ///     }
    /// }
    ///
    /// let mut model = Model::new();
    /// let id = model.add(ObjectBuilder::new(Meter).name("meter_1")).unwrap();
    /// assert_eq!(model.find_by_name("meter_1"), Some(id));
    /// assert!(model.add(ObjectBuilder::new(Meter).name("meter_1")).is_err());
    /// ```
    pub fn add(&mut self, builder: ObjectBuilder) -> Result<ObjectId, SimulationError> {
        let id = ObjectId(self.objects.len());
        if let Some(name) = &builder.name {
            if self.by_name.contains_key(name) {
                return Err(SimulationError::InvalidConfig(format!(
                    "duplicate object name '{}'",
                    name
                )));
            }
            self.by_name.insert(name.clone(), id);
        }
        self.objects.push(SimObject::from_builder(id, builder));
        Ok(id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&SimObject> {
        self.objects.get(id.index())
    }

    /// Like [`Model::get`], but an unknown id is an error
    pub fn object(&self, id: ObjectId) -> Result<&SimObject, SimulationError> {
        self.get(id).ok_or(SimulationError::UnknownObject(id))
    }

    pub(crate) fn get_mut(&mut self, id: ObjectId) -> Result<&mut SimObject, SimulationError> {
        self.objects
            .get_mut(id.index())
            .ok_or(SimulationError::UnknownObject(id))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimObject> {
        self.objects.iter()
    }

    pub fn find_by_name(&self, name: &str) -> Option<ObjectId> {
        self.by_name.get(name).copied()
    }

    /// Ids ordered by ascending rank, ties broken by id
    pub fn ids_by_rank(&self) -> Vec<ObjectId> {
        let mut ids: Vec<(Rank, ObjectId)> = self.objects.iter().map(|o| (o.rank(), o.id())).collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Highest rank in use, `None` for an empty model
    pub fn max_rank(&self) -> Option<Rank> {
        self.objects.iter().map(|o| o.rank()).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::Timestamp;
    use crate::models::behavior::{CallbackError, NextChange, ObjectBehavior};
    use crate::models::object::PassType;

    struct Idle;

    impl ObjectBehavior for Idle {
        fn sync(&self, _: &SimObject, _: Timestamp, _: PassType) -> Result<NextChange, CallbackError> {
            Ok(NextChange::Never)
        }
    }

    #[test]
    fn test_ids_follow_insertion_order() {
        let mut model = Model::new();
        let a = model.add(ObjectBuilder::new(Idle)).unwrap();
        let b = model.add(ObjectBuilder::new(Idle)).unwrap();
        assert_eq!(a, ObjectId(0));
        assert_eq!(b, ObjectId(1));
        assert_eq!(model.len(), 2);
    }

    #[test]
    fn test_unknown_object() {
        let model = Model::new();
        assert!(matches!(
            model.object(ObjectId(7)),
            Err(SimulationError::UnknownObject(ObjectId(7)))
        ));
    }

    #[test]
    fn test_ids_by_rank() {
        let mut model = Model::new();
        let a = model.add(ObjectBuilder::new(Idle).rank(2)).unwrap();
        let b = model.add(ObjectBuilder::new(Idle).rank(0)).unwrap();
        let c = model.add(ObjectBuilder::new(Idle).rank(2)).unwrap();
        assert_eq!(model.ids_by_rank(), vec![b, a, c]);
        assert_eq!(model.max_rank(), Some(2));
    }
}
