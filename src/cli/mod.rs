//! CLI module for genserve - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for serving, running a
//! single job locally, and the internal warm-up worker.

pub mod commands;

pub use commands::{Cli, Commands, EngineKind};
