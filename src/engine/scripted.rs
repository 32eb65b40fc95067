//! Scripted engine - deterministic, in-process stand-in for a real engine.
//!
//! Completes after `iterations` steps (from the job, or the factory default),
//! overwriting its output file with `"<prompt> #<step>"` every step. Failures
//! and delays can be injected to exercise the orchestration paths.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{EngineFactory, GenerationEngine};
use crate::domain::EngineSettings;
use crate::error::{GenserveError, Result};

/// Builds `ScriptedEngine`s with a shared script.
#[derive(Debug, Clone)]
pub struct ScriptedEngineFactory {
    default_steps: u32,
    fail_init: bool,
    fail_at_step: Option<u32>,
    never_complete: bool,
    init_delay: Duration,
    step_delay: Duration,
    created: Arc<AtomicUsize>,
    active_steps: Arc<AtomicUsize>,
    peak_active_steps: Arc<AtomicUsize>,
}

impl Default for ScriptedEngineFactory {
    fn default() -> Self {
        Self {
            default_steps: 1,
            fail_init: false,
            fail_at_step: None,
            never_complete: false,
            init_delay: Duration::ZERO,
            step_delay: Duration::ZERO,
            created: Arc::new(AtomicUsize::new(0)),
            active_steps: Arc::new(AtomicUsize::new(0)),
            peak_active_steps: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ScriptedEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps to take when the job does not set `iterations`.
    pub fn default_steps(mut self, steps: u32) -> Self {
        self.default_steps = steps.max(1);
        self
    }

    /// Make `init` fail.
    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Make the given 1-based step fail.
    pub fn fail_at_step(mut self, step: u32) -> Self {
        self.fail_at_step = Some(step);
        self
    }

    /// Never report completion.
    pub fn never_complete(mut self) -> Self {
        self.never_complete = true;
        self
    }

    /// Sleep this long inside `init`.
    pub fn init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    /// Sleep this long inside every step.
    pub fn step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Number of engines created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Most steps that were ever running at the same time, across all
    /// engines from this factory.
    pub fn peak_active_steps(&self) -> usize {
        self.peak_active_steps.load(Ordering::SeqCst)
    }
}

/// Counts one step as active until dropped.
struct ActiveStep<'a>(&'a AtomicUsize);

impl<'a> ActiveStep<'a> {
    fn enter(active: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveStep<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EngineFactory for ScriptedEngineFactory {
    fn create(&self, settings: EngineSettings) -> Result<Box<dyn GenerationEngine>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let total_steps = settings
            .iterations()
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(self.default_steps);
        Ok(Box::new(ScriptedEngine {
            settings,
            script: self.clone(),
            total_steps,
            taken: 0,
            initialized: false,
        }))
    }
}

/// Engine produced by `ScriptedEngineFactory`.
#[derive(Debug)]
pub struct ScriptedEngine {
    settings: EngineSettings,
    script: ScriptedEngineFactory,
    total_steps: u32,
    taken: u32,
    initialized: bool,
}

impl GenerationEngine for ScriptedEngine {
    fn init(&mut self) -> Result<()> {
        if !self.script.init_delay.is_zero() {
            std::thread::sleep(self.script.init_delay);
        }
        if self.script.fail_init {
            return Err(GenserveError::Engine("scripted init failure".to_string()));
        }
        fs::create_dir_all(self.settings.output_dir())?;
        self.initialized = true;
        Ok(())
    }

    fn step(&mut self) -> Result<bool> {
        if !self.initialized {
            return Err(GenserveError::Engine("step called before init".to_string()));
        }
        let _active = ActiveStep::enter(&self.script.active_steps, &self.script.peak_active_steps);
        if !self.script.step_delay.is_zero() {
            std::thread::sleep(self.script.step_delay);
        }
        self.taken += 1;
        if self.script.fail_at_step == Some(self.taken) {
            return Err(GenserveError::Engine(format!("scripted failure at step {}", self.taken)));
        }
        fs::write(
            self.settings.output_path(),
            format!("{} #{}", self.settings.prompt(), self.taken),
        )?;
        Ok(!self.script.never_complete && self.taken >= self.total_steps)
    }

    fn output_path(&self) -> PathBuf {
        self.settings.output_path()
    }
}
