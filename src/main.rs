//! # aptly-reconcile CLI
//!
//! Binary entry point for the `aptly-reconcile` command-line tool.
//!
//! Its responsibilities are:
//! - Parsing command-line arguments using `clap`.
//! - Initialising logging and dispatching to the selected command.
//! - Turning errors into a non-zero exit status.
//!
//! The reconciliation logic lives in the `aptly_reconcile` library crate; the
//! binary is a thin wrapper around it.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
