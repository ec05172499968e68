//! Rank index: per-pass buckets of objects sharing a rank
//!
//! Built once from final ranks and never rebuilt during a run. Each bucket is
//! the unit of parallel dispatch; members of a bucket carry no ordering
//! guarantee relative to each other.

use crate::models::model::Model;
use crate::models::object::{ObjectId, PassType, Rank, Traversal};
use crate::rng::RngManager;
use std::sync::Arc;

/// Objects sharing one (pass, rank) pair
#[derive(Debug, Clone)]
pub struct RankBucket {
    pub pass: PassType,
    pub rank: Rank,
    /// Index of this bucket across all passes, used to address its worker pool
    pub slot: usize,
    pub members: Arc<[ObjectId]>,
}

impl RankBucket {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Buckets of one pass, addressed by rank
#[derive(Debug, Clone, Default)]
pub struct PassRanks {
    buckets: Vec<Option<RankBucket>>,
    first_used: Option<Rank>,
    last_used: Option<Rank>,
}

impl PassRanks {
    pub fn bucket(&self, rank: Rank) -> Option<&RankBucket> {
        self.buckets.get(rank as usize).and_then(|b| b.as_ref())
    }

    pub fn first_used(&self) -> Option<Rank> {
        self.first_used
    }

    pub fn last_used(&self) -> Option<Rank> {
        self.last_used
    }

    /// Non-empty buckets in the given direction, limited to the used range
    pub fn iter(&self, traversal: Traversal) -> Box<dyn Iterator<Item = &RankBucket> + '_> {
        let (first, last) = match (self.first_used, self.last_used) {
            (Some(first), Some(last)) => (first as usize, last as usize),
            _ => return Box::new(std::iter::empty()),
        };
        let used = self.buckets[first..=last].iter().filter_map(|b| b.as_ref());
        match traversal {
            Traversal::Ascending => Box::new(used),
            Traversal::Descending => Box::new(used.rev()),
        }
    }
}

/// Buckets for all three passes
#[derive(Debug, Clone, Default)]
pub struct RankIndex {
    passes: [PassRanks; 3],
    bucket_count: usize,
}

impl RankIndex {
    /// Group every object into the buckets of the passes it takes part in
    ///
    /// Members are listed in id order unless `shuffle` is given, in which case
    /// each bucket is shuffled once.
    pub fn build(model: &Model, mut shuffle: Option<&mut RngManager>) -> Self {
        let mut index = RankIndex::default();

        for pass in PassType::ALL {
            let mut grouped: Vec<Vec<ObjectId>> = Vec::new();
            for object in model.iter().filter(|o| o.passes().includes(pass)) {
                let rank = object.rank() as usize;
                if grouped.len() <= rank {
                    grouped.resize_with(rank + 1, Vec::new);
                }
                grouped[rank].push(object.id());
            }

            let ranks = &mut index.passes[pass.index()];
            for (rank, mut members) in grouped.into_iter().enumerate() {
                if members.is_empty() {
                    ranks.buckets.push(None);
                    continue;
                }
                if let Some(rng) = shuffle.as_deref_mut() {
                    rng.shuffle(&mut members);
                }
                let rank = rank as Rank;
                ranks.first_used.get_or_insert(rank);
                ranks.last_used = Some(rank);
                ranks.buckets.push(Some(RankBucket {
                    pass,
                    rank,
                    slot: index.bucket_count,
                    members: members.into(),
                }));
                index.bucket_count += 1;
            }
        }

        index
    }

    pub fn pass(&self, pass: PassType) -> &PassRanks {
        &self.passes[pass.index()]
    }

    /// Buckets of `pass` in its traversal order
    pub fn traverse(&self, pass: PassType) -> impl Iterator<Item = &RankBucket> + '_ {
        self.pass(pass).iter(pass.traversal())
    }

    /// Number of non-empty buckets across all passes
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Size of the largest bucket
    pub fn widest_bucket(&self) -> usize {
        self.passes
            .iter()
            .flat_map(|p| p.buckets.iter().flatten())
            .map(|b| b.len())
            .max()
            .unwrap_or(0)
    }
}
