//! Warm-up module - exercises the engine once before traffic is accepted.
//!
//! This module provides:
//! - WarmupSupervisor for running the canned job under a hard deadline
//! - Isolate and IsolateLauncher for hosting the run where it can be torn down
//! - TaskLauncher (in-process) and ProcessLauncher (child process) backends

mod isolate;
mod supervisor;

pub use isolate::{
    Isolate, IsolateExit, IsolateLauncher, ProcessIsolate, ProcessLauncher, TaskIsolate, TaskLauncher,
    WARMUP_JOB_ENV,
};
pub use supervisor::{DEFAULT_WARMUP_DEADLINE, DEFAULT_WARMUP_GRACE, WarmupConfig, WarmupSupervisor};
