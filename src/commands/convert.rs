//! # Convert Command Implementation
//!
//! Converts a YAML, JSON or TOML configuration to TOML, the primary format.
//! `--add-defaults` fills in the `components` and `distribution` fields that
//! older configurations left implicit.

use anyhow::{Context, Result};
use clap::Args;
use std::fs;
use std::path::PathBuf;

use aptly_reconcile::config::{self, Format};
use aptly_reconcile::output::{emoji, OutputConfig};

/// Convert a configuration file to TOML
#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Configuration file to convert
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Write the result here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Fill in `components` and `distribution` where they are missing
    #[arg(long)]
    pub add_defaults: bool,
}

/// Execute the `convert` command.
pub fn execute(args: ConvertArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let format = Format::from_path(&args.input)?;
    let content = fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let converted = config::convert(&content, format, args.add_defaults)?;

    match &args.output {
        Some(path) => {
            fs::write(path, converted)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{} Wrote {}",
                emoji(&out, "✅", "[OK]"),
                path.display()
            );
        }
        None => print!("{}", converted),
    }
    Ok(())
}
