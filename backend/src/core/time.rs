//! Time management for the simulation
//!
//! Simulated time is an integer count of seconds. The global clock only moves
//! forward: every committed timestep lands strictly later than the previous one.
//! `Timestamp::NEVER` marks "no further change expected".

use crate::orchestrator::SimulationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in simulated time, in whole seconds
///
/// # Example
/// ```
/// use grid_simulator_core_rs::Timestamp;
///
/// let t = Timestamp::from_secs(3600);
/// assert!(t < Timestamp::NEVER);
/// assert_eq!(t.saturating_add(60).as_secs(), 3660);
/// assert!(Timestamp::NEVER.saturating_add(60).is_never());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Simulation epoch
    pub const ZERO: Timestamp = Timestamp(0);

    /// No further change expected
    pub const NEVER: Timestamp = Timestamp(i64::MAX);

    pub const fn from_secs(secs: i64) -> Self {
        Timestamp(secs)
    }

    pub const fn as_secs(self) -> i64 {
        self.0
    }

    pub const fn is_never(self) -> bool {
        self.0 == i64::MAX
    }

    /// Add seconds, pinning at `NEVER`
    pub fn saturating_add(self, secs: i64) -> Self {
        if self.is_never() {
            return self;
        }
        Timestamp(self.0.saturating_add(secs))
    }

    /// Round up to the next multiple of `quantum`
    ///
    /// Quanta of 0 or 1 and `NEVER` leave the value untouched. A value that is
    /// already on a boundary stays where it is.
    ///
    /// # Example
    /// ```
    /// use grid_simulator_core_rs::Timestamp;
    ///
    /// assert_eq!(Timestamp::from_secs(61).round_up_to(60), Timestamp::from_secs(120));
    /// assert_eq!(Timestamp::from_secs(120).round_up_to(60), Timestamp::from_secs(120));
    /// assert_eq!(Timestamp::from_secs(7).round_up_to(1), Timestamp::from_secs(7));
    /// ```
    pub fn round_up_to(self, quantum: i64) -> Self {
        if quantum <= 1 || self.is_never() || self.0 <= 0 {
            return self;
        }
        Timestamp(((self.0 - 1) / quantum + 1).saturating_mul(quantum))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            write!(f, "NEVER")
        } else {
            write!(f, "{}s", self.0)
        }
    }
}

/// Owns the global simulated clock for one run
///
/// # Example
/// ```
/// use grid_simulator_core_rs::{TimeManager, Timestamp};
///
/// let mut time = TimeManager::new(Timestamp::ZERO, Timestamp::from_secs(100));
/// assert_eq!(time.current(), Timestamp::ZERO);
///
/// time.advance_to(Timestamp::from_secs(10)).unwrap();
/// assert_eq!(time.current(), Timestamp::from_secs(10));
/// assert_eq!(time.timesteps(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeManager {
    /// Time the run started at
    start: Timestamp,
    /// Current global clock
    current: Timestamp,
    /// Configured stop time (`NEVER` when unbounded)
    stop: Timestamp,
    /// Number of committed clock advances
    timesteps: u64,
}

impl TimeManager {
    pub fn new(start: Timestamp, stop: Timestamp) -> Self {
        Self {
            start,
            current: start,
            stop,
            timesteps: 0,
        }
    }

    /// Move the clock forward to `next`
    ///
    /// # Errors
    /// `ClockRegression` when `next` is not strictly later than the current
    /// clock or is `NEVER`.
    pub fn advance_to(&mut self, next: Timestamp) -> Result<(), SimulationError> {
        if next <= self.current || next.is_never() {
            return Err(SimulationError::ClockRegression {
                current: self.current,
                requested: next,
            });
        }
        self.current = next;
        self.timesteps += 1;
        Ok(())
    }

    pub fn current(&self) -> Timestamp {
        self.current
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn stop(&self) -> Timestamp {
        self.stop
    }

    /// Whether the run has no configured stop time
    pub fn is_unbounded(&self) -> bool {
        self.stop.is_never()
    }

    pub fn timesteps(&self) -> u64 {
        self.timesteps
    }

    /// Simulated seconds elapsed since the start of the run
    pub fn elapsed_secs(&self) -> i64 {
        self.current.as_secs().saturating_sub(self.start.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_rejects_same_time() {
        let mut time = TimeManager::new(Timestamp::from_secs(5), Timestamp::NEVER);
        let err = time.advance_to(Timestamp::from_secs(5)).unwrap_err();
        assert!(matches!(err, SimulationError::ClockRegression { .. }));
        assert_eq!(time.timesteps(), 0);
    }

    #[test]
    fn test_advance_rejects_never() {
        let mut time = TimeManager::new(Timestamp::ZERO, Timestamp::NEVER);
        assert!(time.advance_to(Timestamp::NEVER).is_err());
    }

    #[test]
    fn test_round_up_ignores_non_positive() {
        assert_eq!(Timestamp::ZERO.round_up_to(60), Timestamp::ZERO);
        assert_eq!(Timestamp::NEVER.round_up_to(60), Timestamp::NEVER);
    }

    #[test]
    fn test_display() {
        assert_eq!(Timestamp::from_secs(42).to_string(), "42s");
        assert_eq!(Timestamp::NEVER.to_string(), "NEVER");
    }
}
