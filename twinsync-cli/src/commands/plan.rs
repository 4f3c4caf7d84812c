//! `twinsync plan <pair>`: snapshots and decision, no side effects on remotes.

use anyhow::{Context, Result};
use clap::Args;

use twinsync_core::{RemoteSnapshot, SyncDecision};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Pair name.
    pub name: String,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let pair = super::load_pair(&home, &self.name)?;
        let plan = twinsync_sync::plan_at(&home, &pair)
            .with_context(|| format!("could not plan '{}'", pair.name))?;

        print_snapshot(&plan.source);
        print_snapshot(&plan.hosted);
        println!("decision: {}", plan.decision);
        println!("  {}", explain(plan.decision));
        Ok(())
    }
}

fn print_snapshot(snapshot: &RemoteSnapshot) {
    println!(
        "{:<7} {} @ {}  {}",
        snapshot.remote.to_string(),
        snapshot.branch,
        snapshot.commit.short(),
        snapshot.committed_at.to_rfc3339()
    );
}

fn explain(decision: SyncDecision) -> &'static str {
    match decision {
        SyncDecision::NoOp => "commit timestamps are equal; nothing to do",
        SyncDecision::PullBack => "hosted is newer; hosted edits would be merged into source",
        SyncDecision::PushForward => {
            "source is newer; hosted would be force-overwritten with source (hosted-only commits are lost)"
        }
    }
}
