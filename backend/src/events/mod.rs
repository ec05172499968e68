//! Run notifications
//!
//! An [`ExecObserver`] attached to the executive hears about every committed
//! timestep, every checkpoint written and the end of the run. [`EventLog`]
//! is an observer that simply records everything, for replay and tests.
//!
//! # Example
//!
//! ```rust
//! use grid_simulator_core_rs::events::{EventLog, ExecEvent, ExecObserver, TimestepReport};
//! use grid_simulator_core_rs::Timestamp;
//!
//! let log = EventLog::new();
//! log.on_timestep(&TimestepReport {
//!     time: Timestamp::ZERO,
//!     next_time: Timestamp::from_secs(60),
//!     iterations: 2,
//!     hard_events: 1,
//! });
//!
//! assert_eq!(log.len(), 1);
//! assert!(matches!(log.events()[0], ExecEvent::Timestep(_)));
//! ```

use crate::core::time::Timestamp;
use crate::orchestrator::RunSummary;
use std::path::PathBuf;
use std::sync::Mutex;

/// One resolved timestep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestepReport {
    /// Time that was committed
    pub time: Timestamp,
    /// Time the clock moves to next (`NEVER` when the run is over)
    pub next_time: Timestamp,
    /// Convergence iterations it took
    pub iterations: u32,
    /// Hard events reported in the final iteration
    pub hard_events: u32,
}

/// Recorded notification
#[derive(Debug, Clone, PartialEq)]
pub enum ExecEvent {
    Timestep(TimestepReport),
    CheckpointWritten {
        sequence: u64,
        time: Timestamp,
        path: PathBuf,
    },
    RunComplete(RunSummary),
}

impl ExecEvent {
    /// Simulated time the event refers to
    pub fn time(&self) -> Timestamp {
        match self {
            ExecEvent::Timestep(report) => report.time,
            ExecEvent::CheckpointWritten { time, .. } => *time,
            ExecEvent::RunComplete(summary) => summary.final_time,
        }
    }
}

/// Receives run notifications; called on the coordinator thread
pub trait ExecObserver: Send + Sync {
    fn on_timestep(&self, _report: &TimestepReport) {}

    fn on_checkpoint(&self, _sequence: u64, _time: Timestamp, _path: &std::path::Path) {}

    fn on_run_complete(&self, _summary: &RunSummary) {}
}

/// Observer that keeps every notification in memory
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<ExecEvent>>,
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ExecEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all events so far
    pub fn events(&self) -> Vec<ExecEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Committed timesteps in order
    pub fn timesteps(&self) -> Vec<TimestepReport> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ExecEvent::Timestep(report) => Some(report),
                _ => None,
            })
            .collect()
    }
}

impl ExecObserver for EventLog {
    fn on_timestep(&self, report: &TimestepReport) {
        self.push(ExecEvent::Timestep(*report));
    }

    fn on_checkpoint(&self, sequence: u64, time: Timestamp, path: &std::path::Path) {
        self.push(ExecEvent::CheckpointWritten {
            sequence,
            time,
            path: path.to_path_buf(),
        });
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        self.push(ExecEvent::RunComplete(summary.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn report(secs: i64) -> TimestepReport {
        TimestepReport {
            time: Timestamp::from_secs(secs),
            next_time: Timestamp::from_secs(secs + 10),
            iterations: 1,
            hard_events: 1,
        }
    }

    #[test]
    fn test_len_survives_poisoned_lock() {
        let log = Arc::new(EventLog::new());
        log.on_timestep(&report(0));

        let poisoner = Arc::clone(&log);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.events.lock().unwrap();
            panic!("observer panicked while holding the log");
        })
        .join();

        assert!(log.events.is_poisoned());
        assert_eq!(log.len(), 1);
        log.on_timestep(&report(10));
        assert_eq!(log.len(), 2);
        assert_eq!(log.timesteps().len(), 2);
    }
}
