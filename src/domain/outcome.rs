//! Run and warm-up outcome types.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// An immutable point-in-time copy of the engine output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Job the snapshot belongs to
    pub job_id: String,
    /// 1-based iteration that produced it
    pub iteration: u32,
    /// Location of the copy
    pub path: PathBuf,
}

impl Snapshot {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub job_id: String,
    /// Snapshot taken after the final step
    pub snapshot: Snapshot,
    /// Number of engine steps taken
    pub iterations: u32,
    /// Object keys written to durable storage
    pub published: Vec<String>,
}

/// Terminal state of a warm-up attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmupOutcome {
    /// Warm-up run finished within the deadline
    Completed,
    /// Warm-up run finished within the deadline but reported an error
    Failed(String),
    /// Deadline passed; the isolate was terminated
    TimedOut {
        /// Whether teardown finished within the grace period
        torn_down: bool,
    },
    /// Warm-up disabled by configuration
    Skipped,
}

impl WarmupOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, WarmupOutcome::Failed(_))
    }
}

/// What the supervisor observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupReport {
    pub outcome: WarmupOutcome,
    pub elapsed: Duration,
    /// Whether the readiness gate is open after the attempt
    pub ready: bool,
}
