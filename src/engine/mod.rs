//! Generation engine boundary.
//!
//! The engine is opaque: it is initialized once per run and then asked to do
//! one unit of refinement at a time, overwriting its output file in place and
//! reporting whether the run is complete. Engine calls block, so callers run
//! them on blocking worker threads.
//!
//! - `CommandEngine`: drives an external program through a small process protocol
//! - `ScriptedEngine`: deterministic in-process engine for tests and local runs

mod command;
mod scripted;

use std::path::PathBuf;

use crate::domain::EngineSettings;
use crate::error::Result;

pub use command::{CommandEngine, CommandEngineFactory, DEFAULT_ENGINE_COMMAND, program_exists};
pub use scripted::{ScriptedEngine, ScriptedEngineFactory};

/// One engine instance, owned by exactly one run.
pub trait GenerationEngine: Send {
    /// Expensive one-time setup (loading weights etc.).
    fn init(&mut self) -> Result<()>;

    /// Do one unit of refinement. Returns `true` once the run is complete.
    fn step(&mut self) -> Result<bool>;

    /// File the engine overwrites after every step.
    fn output_path(&self) -> PathBuf;
}

/// Builds a fresh engine from owned settings.
pub trait EngineFactory: Send + Sync {
    fn create(&self, settings: EngineSettings) -> Result<Box<dyn GenerationEngine>>;
}
