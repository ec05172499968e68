//! Checkpoints - periodic snapshots of object state
//!
//! A checkpoint is taken at the top of an outer-loop iteration when the
//! configured interval has elapsed, measured either in wall-clock or in
//! simulated seconds. The first poll only starts the interval.
//!
//! # Critical Invariants
//!
//! - **Non-fatal**: a failed write is logged and the run carries on
//! - **Naming**: files are `<file_base>.<seq>` with `seq` counting from 1
//! - **Retention**: unless `keep_all` is set, the previous file is removed
//!   once the next one has been written
//! - **Config matching**: every header carries the canonical config hash

use crate::core::time::Timestamp;
use crate::models::model::Model;
use crate::models::object::{ObjectId, Rank, ServiceWindow, SimObject};
use crate::orchestrator::config::{CheckpointConfig, CheckpointMode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Checkpoint format version (increment on breaking changes)
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
}

// ============================================================================
// Snapshot Structures
// ============================================================================

/// Checkpoint file header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointHeader {
    /// Checkpoint format version
    pub version: u32,

    /// Identifies the run that wrote the file
    pub run_id: Uuid,

    /// Sequence number, also the file suffix
    pub sequence: u64,

    /// Global clock when the checkpoint was taken
    pub sim_time: Timestamp,

    /// Wall-clock creation time
    pub created_at: SystemTime,

    /// SHA256 of the canonical run configuration
    pub config_hash: String,
}

/// Scheduler state of one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub id: ObjectId,
    pub name: Option<String>,
    pub rank: Rank,
    pub parent: Option<ObjectId>,
    pub dependencies: Vec<ObjectId>,
    pub clock: Timestamp,
    pub valid_to: Timestamp,
    pub service: ServiceWindow,
    pub flags: u32,
    /// Whatever the object's behaviour publishes
    pub attributes: serde_json::Value,
}

impl From<&SimObject> for ObjectSnapshot {
    fn from(object: &SimObject) -> Self {
        ObjectSnapshot {
            id: object.id(),
            name: object.name().map(str::to_string),
            rank: object.rank(),
            parent: object.parent(),
            dependencies: object.dependencies().to_vec(),
            clock: object.clock(),
            valid_to: object.valid_to(),
            service: object.service(),
            flags: object.flags().bits(),
            attributes: object.behavior().publish(),
        }
    }
}

/// Complete checkpoint file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub header: CheckpointHeader,
    pub objects: Vec<ObjectSnapshot>,
}

// ============================================================================
// Trigger
// ============================================================================

/// Decides when the next checkpoint is due
#[derive(Debug, Clone)]
pub struct CheckpointTrigger {
    interval: i64,
    last: Option<i64>,
}

impl CheckpointTrigger {
    pub fn new(interval: i64) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a checkpoint is due at `now` (seconds in the trigger's own clock)
    ///
    /// # Example
    /// ```
    /// use grid_simulator_core_rs::orchestrator::checkpoint::CheckpointTrigger;
    ///
    /// let mut trigger = CheckpointTrigger::new(60);
    /// assert!(!trigger.poll(0));
    /// assert!(!trigger.poll(59));
    /// assert!(trigger.poll(60));
    /// assert!(!trigger.poll(100));
    /// assert!(trigger.poll(130));
    /// ```
    pub fn poll(&mut self, now: i64) -> bool {
        match self.last {
            None => {
                self.last = Some(now);
                false
            }
            Some(last) if last.saturating_add(self.interval) <= now => {
                self.last = Some(now);
                true
            }
            Some(_) => false,
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Writes checkpoint files for one run
#[derive(Debug)]
pub struct CheckpointWriter {
    config: CheckpointConfig,
    trigger: CheckpointTrigger,
    run_id: Uuid,
    config_hash: String,
    sequence: u64,
    previous: Option<PathBuf>,
}

impl CheckpointWriter {
    /// `None` when checkpoints are disabled
    pub fn new(config: &CheckpointConfig, config_hash: String) -> Option<Self> {
        if config.mode == CheckpointMode::None {
            return None;
        }
        Some(Self {
            config: config.clone(),
            trigger: CheckpointTrigger::new(config.effective_interval()),
            run_id: Uuid::new_v4(),
            config_hash,
            sequence: 0,
            previous: None,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Write a checkpoint if one is due
    ///
    /// `wall_secs` is the wall-clock time elapsed since the run started.
    /// Returns the sequence number and path of the file written, if any.
    pub fn poll(&mut self, model: &Model, sim_time: Timestamp, wall_secs: i64) -> Option<(u64, PathBuf)> {
        let now = match self.config.mode {
            CheckpointMode::WallClock => wall_secs,
            CheckpointMode::Simulated => sim_time.as_secs(),
            CheckpointMode::None => return None,
        };
        if !self.trigger.poll(now) {
            return None;
        }

        self.sequence += 1;
        let path = checkpoint_path(&self.config.file_base, self.sequence);
        let checkpoint = Checkpoint {
            header: CheckpointHeader {
                version: CHECKPOINT_VERSION,
                run_id: self.run_id,
                sequence: self.sequence,
                sim_time,
                created_at: SystemTime::now(),
                config_hash: self.config_hash.clone(),
            },
            objects: model.iter().map(ObjectSnapshot::from).collect(),
        };

        if let Err(e) = write_checkpoint(&path, &checkpoint) {
            error!(
                path = %path.display(),
                sequence = self.sequence,
                error = %e,
                "Failed to write checkpoint"
            );
            return None;
        }
        info!(
            path = %path.display(),
            sequence = self.sequence,
            sim_time = %sim_time,
            "Checkpoint written"
        );

        if !self.config.keep_all {
            if let Some(previous) = self.previous.take() {
                if let Err(e) = fs::remove_file(&previous) {
                    warn!(path = %previous.display(), error = %e, "Failed to remove previous checkpoint");
                }
            }
        }
        self.previous = Some(path.clone());
        Some((self.sequence, path))
    }
}

/// `<file_base>.<sequence>`
pub fn checkpoint_path(file_base: &Path, sequence: u64) -> PathBuf {
    let mut name = file_base.as_os_str().to_os_string();
    name.push(format!(".{}", sequence));
    PathBuf::from(name)
}

fn write_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, checkpoint)?;
    writer.flush()?;
    Ok(())
}

/// Read a checkpoint file back
pub fn load_checkpoint(path: &Path) -> Result<Checkpoint, CheckpointError> {
    let reader = BufReader::new(File::open(path)?);
    let checkpoint: Checkpoint = serde_json::from_reader(reader)?;
    if checkpoint.header.version != CHECKPOINT_VERSION {
        return Err(CheckpointError::Version {
            found: checkpoint.header.version,
            expected: CHECKPOINT_VERSION,
        });
    }
    Ok(checkpoint)
}

// ============================================================================
// Config Hashing
// ============================================================================

/// Compute deterministic SHA256 hash of a config
///
/// Uses canonical JSON serialization with sorted keys, so the hash does not
/// depend on map iteration order.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, CheckpointError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let canonical = canonicalize(serde_json::to_value(config)?);
    let json = serde_json::to_string(&canonical)?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
