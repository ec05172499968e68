//! Scheduler: rank assignment, rank index and pass execution
//!
//! - **rank**: keeps `rank(child) > rank(parent)` and detects cycles
//! - **rank_index**: groups objects into (pass, rank) buckets
//! - **pass**: synchronises the buckets of one pass in traversal order
//! - **worker_pool**: persistent per-bucket threads behind a barrier

pub mod pass;
pub mod rank;
pub mod rank_index;
pub mod worker_pool;

pub use pass::{evaluate_object, PassExecutor, SyncJob, SyncSettings, SyncState};
pub use rank::{assign_ranks, set_dependent, set_parent, set_rank};
pub use rank_index::{PassRanks, RankBucket, RankIndex};
pub use worker_pool::BucketPool;
