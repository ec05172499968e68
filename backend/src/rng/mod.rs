//! Deterministic random number generation
//!
//! Uses xorshift64* algorithm for fast, deterministic random number generation.
//! The only consumer is the optional bucket shuffle; every shuffled order is
//! reproducible from the configured seed.

mod xorshift;

pub use xorshift::RngManager;
