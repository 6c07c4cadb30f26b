//! Apply command implementation
//!
//! Reads the live state, plans every entity in dependency order and runs the
//! plan through aptly and gpg. After a real run the state is read again and
//! re-planned without refresh operations; anything left is reported, since a
//! second pass should find nothing to do.

use anyhow::Result;
use clap::Args;

use aptly_reconcile::output::{emoji, OutputConfig};
use aptly_reconcile::reconcile::{self, Options};
use aptly_reconcile::runner::{CommandRunner, PretendRunner, SystemRunner};

use super::{reference_time, ConfigArgs, ToolArgs};

/// Arguments for the apply command
#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub tools: ToolArgs,

    /// Log the commands instead of running them
    #[arg(short = 'n', long)]
    pub pretend: bool,

    /// Do not refresh existing mirrors and repo publishes
    #[arg(long)]
    pub no_refresh: bool,

    /// Reference time (YYYYMMDDTHHMMZ or RFC 3339) instead of the current time
    #[arg(long, value_name = "TIME")]
    pub now: Option<String>,
}

/// Execute the apply command
pub fn execute(args: ApplyArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let config = args.config.load()?;
    let options = Options {
        now: reference_time(args.now.as_deref())?,
        refresh: !args.no_refresh,
    };

    let reader = args.tools.reader();
    let live = reader.live()?;
    let plan = reconcile::plan(&config, &live, &options)?;

    if args.pretend {
        println!("{} Pretend mode, nothing is changed", emoji(&out, "🔎", "[PRETEND]"));
    }
    let runner: Box<dyn CommandRunner> = if args.pretend {
        Box::new(PretendRunner)
    } else {
        Box::new(SystemRunner::new(&args.tools.aptly_bin, &args.tools.gpg_bin))
    };

    let summary = reconcile::execute::execute(&plan, runner.as_ref(), Some(&reader));
    println!("{}", summary);

    if !summary.is_success() {
        println!("{} Reconciliation incomplete", emoji(&out, "❌", "[ERR]"));
        anyhow::bail!(
            "{} operations failed, {} entities could not be planned",
            summary.failed().count(),
            summary.planning_errors.len()
        );
    }

    if !args.pretend {
        let live = reader.live()?;
        let check = reconcile::plan(
            &config,
            &live,
            &Options {
                refresh: false,
                ..options
            },
        )?;
        if !check.converged() {
            log::warn!(
                "State has not converged, {} operations remain:\n{}",
                check.state_changing().len(),
                check
            );
            println!(
                "{} Live state still differs from the configuration, run apply again",
                emoji(&out, "⚠️", "[WARN]")
            );
            return Ok(());
        }
    }

    println!("{} Reconciliation complete", emoji(&out, "✅", "[OK]"));
    Ok(())
}
