//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - serve: start the HTTP server (default)
//! - run: run one job locally and print the final snapshot
//! - warmup: internal, runs the warm-up job in a child process

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Genserve - HTTP serving shim for an iterative generation engine
#[derive(Parser, Debug)]
#[command(name = "genserve")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Which engine backend to drive.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineKind {
    /// External engine program
    #[default]
    Command,
    /// Built-in deterministic engine
    Scripted,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Command => "command",
            EngineKind::Scripted => "scripted",
        }
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Engine backend
        #[arg(long, value_enum, default_value_t = EngineKind::Command)]
        engine: EngineKind,
    },

    /// Run one job locally and print the final snapshot path
    Run {
        /// Job specification as a JSON object, e.g. '{"prompts": "a red cube"}'
        #[arg(long)]
        job: String,

        /// Engine backend
        #[arg(long, value_enum, default_value_t = EngineKind::Command)]
        engine: EngineKind,
    },

    /// Run the warm-up job (spawned by `serve`)
    #[command(hide = true)]
    Warmup {
        /// Engine backend
        #[arg(long, value_enum, default_value_t = EngineKind::Command)]
        engine: EngineKind,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_serve() {
        let cli = Cli::try_parse_from(["genserve"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.is_verbose());
    }

    #[test]
    fn test_serve_engine_flag() {
        let cli = Cli::try_parse_from(["genserve", "serve", "--engine", "scripted"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve { engine: EngineKind::Scripted })));
    }

    #[test]
    fn test_run_takes_job() {
        let cli = Cli::try_parse_from(["genserve", "-v", "run", "--job", r#"{"prompts":"x"}"#]).unwrap();
        assert!(cli.is_verbose());
        match cli.command {
            Some(Commands::Run { job, engine }) => {
                assert_eq!(job, r#"{"prompts":"x"}"#);
                assert_eq!(engine, EngineKind::Command);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_warmup_with_global_config() {
        let cli =
            Cli::try_parse_from(["genserve", "warmup", "--engine", "scripted", "--config", "/etc/genserve.yml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/genserve.yml")));
        assert!(matches!(cli.command, Some(Commands::Warmup { engine: EngineKind::Scripted })));
    }

    #[test]
    fn test_engine_kind_names_round_trip_through_clap() {
        for kind in [EngineKind::Command, EngineKind::Scripted] {
            let cli = Cli::try_parse_from(["genserve", "serve", "--engine", kind.as_str()]).unwrap();
            assert!(matches!(cli.command, Some(Commands::Serve { engine }) if engine == kind));
        }
    }
}
