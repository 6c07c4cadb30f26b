//! # Plan Command Implementation
//!
//! Reads the live state and prints, entity by entity, the aptly and gpg
//! commands `apply` would run. Nothing is executed.

use anyhow::Result;
use clap::Args;

use aptly_reconcile::output::{emoji, OutputConfig};
use aptly_reconcile::reconcile::{self, Options};

use super::{reference_time, ConfigArgs, ToolArgs};

/// Print the operations apply would run
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub tools: ToolArgs,

    /// Leave out refresh operations (update-mirror, update-publish)
    #[arg(long)]
    pub no_refresh: bool,

    /// Reference time (YYYYMMDDTHHMMZ or RFC 3339) instead of the current time
    #[arg(long, value_name = "TIME")]
    pub now: Option<String>,
}

/// Execute the `plan` command.
pub fn execute(args: PlanArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let config = args.config.load()?;
    let options = Options {
        now: reference_time(args.now.as_deref())?,
        refresh: !args.no_refresh,
    };

    let live = args.tools.reader().live()?;
    let plan = reconcile::plan(&config, &live, &options)?;

    if plan.operations().is_empty()
        && plan.warnings().next().is_none()
        && plan.errors().next().is_none()
    {
        println!("{} Nothing to do", emoji(&out, "✅", "[OK]"));
        return Ok(());
    }
    print!("{}", plan);
    println!(
        "\n{} {} operations ({} state-changing), {} warnings",
        emoji(&out, "📋", "[PLAN]"),
        plan.operations().len(),
        plan.state_changing().len(),
        plan.warnings().count()
    );

    let errors: Vec<String> = plan
        .errors()
        .map(|(entity, message)| format!("{}: {}", entity, message))
        .collect();
    if !errors.is_empty() {
        anyhow::bail!("Some entities cannot be planned:\n  {}", errors.join("\n  "));
    }
    Ok(())
}
