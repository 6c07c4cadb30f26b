//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// Reconcile aptly mirrors, repos, snapshots and publishes with a configuration file
#[derive(Parser, Debug)]
#[command(name = "aptly-reconcile")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring aptly in line with the configuration
    Apply(commands::apply::ApplyArgs),

    /// Show the operations apply would run
    Plan(commands::plan::PlanArgs),

    /// Check a configuration file without contacting aptly
    Validate(commands::validate::ValidateArgs),

    /// Show the live aptly state
    State(commands::state::StateArgs),

    /// Convert a YAML or JSON configuration to TOML
    Convert(commands::convert::ConvertArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);
        let color = self.color.as_str();

        match self.command {
            Commands::Apply(args) => commands::apply::execute(args, color),
            Commands::Plan(args) => commands::plan::execute(args, color),
            Commands::Validate(args) => commands::validate::execute(args, color),
            Commands::State(args) => commands::state::execute(args, color),
            Commands::Convert(args) => commands::convert::execute(args, color),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}

fn init_logging(level: &str) {
    // try_init: a second initialisation (e.g. in tests) is not an error
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .try_init();
}
