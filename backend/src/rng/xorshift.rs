//! xorshift64* random number generator
//!
//! Fast, deterministic PRNG used for the one-time shuffle of bucket members.
//!
//! # Algorithm
//!
//! xorshift64* is a variant of xorshift that passes TestU01's BigCrush
//! statistical tests. It uses 64-bit state and produces 64-bit output.
//!
//! # Determinism
//!
//! Same seed → same bucket order. Shuffled runs are reproducible as long as
//! the seed is recorded alongside the configuration.

use serde::{Deserialize, Serialize};

/// Deterministic random number generator using xorshift64*
///
/// # Example
/// ```
/// use grid_simulator_core_rs::RngManager;
///
/// let mut rng = RngManager::new(12345);
/// let mut members = vec![0, 1, 2, 3, 4];
/// rng.shuffle(&mut members);
///
/// members.sort();
/// assert_eq!(members, vec![0, 1, 2, 3, 4]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RngManager {
    /// Internal state (64-bit)
    state: u64,
}

impl RngManager {
    /// Create a new RNG with given seed
    ///
    /// A zero seed is replaced with 1 (xorshift requires non-zero state).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { 1 } else { seed };
        Self { state }
    }

    /// Generate next random u64 value
    pub fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Uniform index in `[0, bound)`; `bound` must be non-zero
    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }

    /// Fisher-Yates shuffle in place
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.below(i + 1);
            items.swap(i, j);
        }
    }

    /// Current state, recorded in checkpoints for replay
    pub fn get_state(&self) -> u64 {
        self.state
    }
}
