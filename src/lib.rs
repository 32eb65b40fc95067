//! Genserve - HTTP serving shim for an iterative generation engine
//!
//! Genserve puts a long-running, opaque generation engine behind a health and
//! predict HTTP contract. It warms the engine up under a hard deadline before
//! reporting ready, drives each job through the engine one refinement step at
//! a time, snapshots the engine output after every step, and publishes the
//! result to durable object storage.

pub mod domain;
pub mod engine;
pub mod error;
pub mod id;
pub mod publish;
pub mod readiness;
pub mod runner;
pub mod server;
pub mod snapshot;
pub mod warmup;

pub use error::{GenserveError, Result};
