//! Tests for the rank index
//!
//! Buckets group objects by (pass, rank); traversal order depends on the pass.

use grid_simulator_core_rs::scheduler::rank::assign_ranks;
use grid_simulator_core_rs::scheduler::rank_index::RankIndex;
use grid_simulator_core_rs::{
    set_parent, CallbackError, Model, NextChange, ObjectBehavior, ObjectBuilder, ObjectId, PassSet,
    PassType, RngManager, SimObject, Timestamp,
};

struct Idle;

impl ObjectBehavior for Idle {
    fn sync(&self, _: &SimObject, _: Timestamp, _: PassType) -> Result<NextChange, CallbackError> {
        Ok(NextChange::Never)
    }
}

/// root (rank 0) with two children (rank 1), one grandchild (rank 2)
fn tree(passes: PassSet) -> Model {
    let mut model = Model::new();
    for _ in 0..4 {
        model.add(ObjectBuilder::new(Idle).passes(passes)).unwrap();
    }
    set_parent(&mut model, ObjectId(1), ObjectId(0)).unwrap();
    set_parent(&mut model, ObjectId(2), ObjectId(0)).unwrap();
    set_parent(&mut model, ObjectId(3), ObjectId(1)).unwrap();
    assign_ranks(&mut model).unwrap();
    model
}

fn ranks_visited(index: &RankIndex, pass: PassType) -> Vec<u32> {
    index.traverse(pass).map(|b| b.rank).collect()
}

#[test]
fn test_buckets_group_by_rank() {
    let model = tree(PassSet::BOTTOM_UP);
    let index = RankIndex::build(&model, None);
    let ranks = index.pass(PassType::BottomUp);

    assert_eq!(&*ranks.bucket(0).unwrap().members, &[ObjectId(0)]);
    assert_eq!(&*ranks.bucket(1).unwrap().members, &[ObjectId(1), ObjectId(2)]);
    assert_eq!(&*ranks.bucket(2).unwrap().members, &[ObjectId(3)]);
    assert_eq!(ranks.first_used(), Some(0));
    assert_eq!(ranks.last_used(), Some(2));
    assert_eq!(index.bucket_count(), 3);
    assert_eq!(index.widest_bucket(), 2);
}

#[test]
fn test_traversal_direction_per_pass() {
    let model = tree(PassSet::all());
    let index = RankIndex::build(&model, None);

    assert_eq!(ranks_visited(&index, PassType::PreTopDown), vec![2, 1, 0]);
    assert_eq!(ranks_visited(&index, PassType::BottomUp), vec![0, 1, 2]);
    assert_eq!(ranks_visited(&index, PassType::PostTopDown), vec![2, 1, 0]);
}

#[test]
fn test_objects_only_in_their_passes() {
    let mut model = Model::new();
    model.add(ObjectBuilder::new(Idle).passes(PassSet::PRE_TOPDOWN)).unwrap();
    model.add(ObjectBuilder::new(Idle).passes(PassSet::POST_TOPDOWN)).unwrap();
    let index = RankIndex::build(&model, None);

    assert_eq!(index.traverse(PassType::PreTopDown).count(), 1);
    assert_eq!(index.traverse(PassType::BottomUp).count(), 0);
    assert_eq!(index.pass(PassType::BottomUp).first_used(), None);
    let post: Vec<_> = index.traverse(PassType::PostTopDown).collect();
    assert_eq!(&*post[0].members, &[ObjectId(1)]);
}

#[test]
fn test_empty_ranks_are_skipped() {
    let mut model = Model::new();
    model.add(ObjectBuilder::new(Idle).rank(0)).unwrap();
    model.add(ObjectBuilder::new(Idle).rank(5)).unwrap();
    let index = RankIndex::build(&model, None);

    assert_eq!(ranks_visited(&index, PassType::BottomUp), vec![0, 5]);
    assert!(index.pass(PassType::BottomUp).bucket(3).is_none());
}

#[test]
fn test_slots_are_unique() {
    let model = tree(PassSet::all());
    let index = RankIndex::build(&model, None);
    let mut slots: Vec<usize> = PassType::ALL
        .iter()
        .flat_map(|p| index.traverse(*p).map(|b| b.slot).collect::<Vec<_>>())
        .collect();
    slots.sort();
    assert_eq!(slots, (0..index.bucket_count()).collect::<Vec<_>>());
}

#[test]
fn test_shuffle_keeps_membership_and_is_reproducible() {
    let mut model = Model::new();
    for _ in 0..30 {
        model.add(ObjectBuilder::new(Idle)).unwrap();
    }

    let plain = RankIndex::build(&model, None);
    let a = RankIndex::build(&model, Some(&mut RngManager::new(42)));
    let b = RankIndex::build(&model, Some(&mut RngManager::new(42)));

    let members = |index: &RankIndex| index.pass(PassType::BottomUp).bucket(0).unwrap().members.to_vec();
    assert_eq!(members(&a), members(&b));
    assert_ne!(members(&a), members(&plain));

    let mut sorted = members(&a);
    sorted.sort();
    assert_eq!(sorted, members(&plain));
}
