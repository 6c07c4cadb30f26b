//! # Validate Command Implementation
//!
//! This module implements the `validate` subcommand, which checks a
//! configuration file without contacting aptly:
//!
//! - **Parsing**: the document must match the schema.
//! - **References**: every mirror, repo, snapshot and publish a snapshot or
//!   publish names must be defined.
//! - **Values**: schedules, retention ages and archive URLs must parse.
//! - **Cycles**: the dependency graph must be acyclic.
//!
//! With `--graph` the dependency graph is printed in Graphviz dot format.

use anyhow::Result;
use clap::Args;

use aptly_reconcile::config;
use aptly_reconcile::output::{emoji, OutputConfig};
use aptly_reconcile::resolver::DependencyGraph;

use super::ConfigArgs;

/// Validate a configuration file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Print the dependency graph in dot format instead of a summary
    #[arg(long)]
    pub graph: bool,
}

/// Execute the `validate` command.
pub fn execute(args: ValidateArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let path = &args.config.config;

    if !args.graph {
        println!(
            "{} Validating configuration: {}",
            emoji(&out, "🔍", "[SCAN]"),
            path.display()
        );
    }

    let config = match config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            println!("{} Configuration parsing failed: {}", emoji(&out, "❌", "[ERR]"), e);
            return Err(anyhow::anyhow!("Configuration parsing failed: {}", e));
        }
    };

    if let Err(e) = config.validate() {
        println!("{} {}", emoji(&out, "❌", "[ERR]"), e);
        return Err(anyhow::anyhow!("Configuration is invalid: {}", e));
    }

    let graph = DependencyGraph::build(&config)?;
    let order = match graph.order() {
        Ok(order) => order,
        Err(e) => {
            println!("{} {}", emoji(&out, "❌", "[ERR]"), e);
            return Err(anyhow::anyhow!("Configuration is invalid: {}", e));
        }
    };

    if args.graph {
        print!("{}", graph.to_dot());
        return Ok(());
    }

    println!("\n{} Configuration Summary:", emoji(&out, "📊", "[INFO]"));
    println!("   Mirrors: {}", config.mirror.len());
    println!("   Repos: {}", config.repo.len());
    println!("   Snapshots: {}", config.snapshot.len());
    println!("   Publishes: {}", config.publishes().count());
    println!("\n   Reconcile order:");
    for entity in &order {
        println!("     {}", entity);
    }
    println!("\n{} Configuration is valid", emoji(&out, "✅", "[OK]"));
    Ok(())
}
