//! # State Command Implementation
//!
//! Prints what aptly and gpg currently report, as seen by the reconciler.

use anyhow::Result;
use clap::Args;

use aptly_reconcile::output::{emoji, heading, OutputConfig};

use super::ToolArgs;

/// Print the live aptly state
#[derive(Args, Debug)]
pub struct StateArgs {
    #[command(flatten)]
    pub tools: ToolArgs,
}

/// Execute the `state` command.
pub fn execute(args: StateArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let live = args.tools.reader().live()?;

    println!("{} {} ({})", emoji(&out, "🪞", "[MIRROR]"), heading(&out, "Mirrors"), live.mirrors.len());
    for mirror in live.mirrors.values() {
        println!(
            "   {} {} {} [{}]",
            mirror.name,
            mirror.archive,
            mirror.distribution,
            mirror.components.join(", ")
        );
    }

    println!("{} {} ({})", emoji(&out, "📦", "[REPO]"), heading(&out, "Repos"), live.repos.len());
    for repo in live.repos.values() {
        println!("   {} {}/{}", repo.name, repo.distribution, repo.component);
    }

    println!("{} {} ({})", emoji(&out, "📸", "[SNAPSHOT]"), heading(&out, "Snapshots"), live.snapshots.len());
    for snapshot in live.snapshots.values() {
        let sources: Vec<&str> = snapshot.snapshot_sources().collect();
        if sources.is_empty() {
            println!("   {}", snapshot.name);
        } else {
            println!("   {} <- {}", snapshot.name, sources.join(", "));
        }
    }

    println!("{} {} ({})", emoji(&out, "🌐", "[PUBLISH]"), heading(&out, "Publishes"), live.publishes.len());
    for publish in live.publishes.values() {
        let sources: Vec<String> = publish
            .sources
            .iter()
            .map(|s| format!("{}: {}", s.component, s.name))
            .collect();
        println!("   {} [{}]", publish.key, sources.join(", "));
    }

    println!("{} Trusted keys: {}", emoji(&out, "🔑", "[GPG]"), live.gpg_keys.len());
    Ok(())
}
