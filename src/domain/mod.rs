//! Domain types for genserve
//!
//! - JobRequest: parameters of one generation run
//! - EngineSettings: owned, resolved engine configuration for one run
//! - Snapshot / RunOutcome: what a run produces
//! - WarmupOutcome / WarmupReport: what the startup supervisor observed

pub mod job;
pub mod outcome;
pub mod settings;

pub use job::JobRequest;
pub use outcome::{RunOutcome, Snapshot, WarmupOutcome, WarmupReport};
pub use settings::{EngineSettings, SettingsBuilder};
