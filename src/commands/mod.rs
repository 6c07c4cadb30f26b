//! # CLI Command Implementations
//!
//! This module contains the implementation for each subcommand of the
//! `aptly-reconcile` command-line tool. Each subcommand is defined in its own
//! file.
//!
//! ## Structure
//!
//! Each command module typically contains:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`.
//! - An `execute` function that takes the parsed `Args` and performs the
//!   command's logic by calling into the `aptly_reconcile` library.
//!
//! Arguments shared by the commands that talk to aptly live in [`ConfigArgs`]
//! and [`ToolArgs`].

pub mod apply;
pub mod completions;
pub mod convert;
pub mod plan;
pub mod state;
pub mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use aptly_reconcile::config::{self, Config};
use aptly_reconcile::state::{AptlySource, StateReader};
use aptly_reconcile::timestamp;

/// Location of the configuration document
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Path to the configuration file (.toml, .yaml/.yml or .json)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "APTLY_RECONCILE_CONFIG",
        default_value = "aptly.toml"
    )]
    pub config: PathBuf,
}

impl ConfigArgs {
    /// Read, parse and statically validate the configuration.
    pub fn load(&self) -> Result<Config> {
        if !self.config.exists() {
            anyhow::bail!("Configuration file not found: {}", self.config.display());
        }
        let config = config::from_file(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))?;
        config.validate()?;
        Ok(config)
    }
}

/// External programs and the reference time
#[derive(Args, Debug)]
pub struct ToolArgs {
    /// aptly executable
    #[arg(long, value_name = "PATH", env = "APTLY_BIN", default_value = "aptly")]
    pub aptly_bin: String,

    /// gpg executable
    #[arg(long, value_name = "PATH", env = "GPG_BIN", default_value = "gpg")]
    pub gpg_bin: String,
}

impl ToolArgs {
    pub fn reader(&self) -> StateReader {
        StateReader::new(Arc::new(AptlySource::new(&self.aptly_bin, &self.gpg_bin)))
    }
}

/// Parse a `--now` override (`YYYYMMDDTHHMMZ` or RFC 3339), defaulting to the current time.
pub fn reference_time(now: Option<&str>) -> Result<DateTime<Utc>> {
    match now {
        None => Ok(Utc::now()),
        Some(value) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
                return Ok(parsed.with_timezone(&Utc));
            }
            Ok(timestamp::parse(value)
                .with_context(|| format!("Invalid --now value '{}'", value))?)
        }
    }
}
