//! Run loop module - drives the generation engine to completion.
//!
//! This module provides the core run execution logic, including:
//! - RunLoop for executing one job against a fresh engine
//! - RunLoopConfig for publishing, step limit and snapshot retention
//! - Blocking engine calls moved onto worker threads

mod run_loop;

pub use run_loop::{RunLoop, RunLoopConfig, job_dir};
