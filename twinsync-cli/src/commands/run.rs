//! `twinsync run <pair>`: one run, for CI jobs, cron and manual use.

use anyhow::{bail, Context, Result};
use clap::Args;

use twinsync_core::{CommitHash, PairName, SyncRun, Trigger, TriggerKind};
use twinsync_sync::{CancelToken, RunResult};

use crate::TriggerArg;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pair name.
    pub name: String,

    /// What caused this run: push | schedule | manual.
    #[arg(long, default_value_t = TriggerArg::default())]
    pub trigger: TriggerArg,

    /// Commit announced by a push trigger.
    #[arg(long, value_name = "SHA")]
    pub commit: Option<String>,

    /// Branch the trigger was raised for; defaults to the pair's source branch.
    /// Triggers for any other branch are skipped.
    #[arg(long)]
    pub branch: Option<String>,

    /// Print the finalized run record as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let pair = super::load_pair(&home, &self.name)?;
        let branch = self.branch.unwrap_or_else(|| pair.source.branch.clone());
        let trigger = build_trigger(self.trigger.0, branch, self.commit)?;

        let cancel = CancelToken::new();
        cancel_on_signal(&cancel)?;
        let result = twinsync_sync::run_pair_at(
            &home,
            &PairName::from(self.name.as_str()),
            trigger,
            &cancel,
        )
        .with_context(|| format!("run of '{}' could not start", self.name))?;

        match result {
            RunResult::Skipped { reason } => {
                println!("skipped: {reason}");
                if cancel.is_cancelled() {
                    bail!("interrupted before the run started");
                }
                Ok(())
            }
            RunResult::Completed { run, receipt } => {
                if self.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&run).context("failed to serialize run")?
                    );
                } else {
                    println!("{}", receipt.subject);
                    print_summary(&run);
                    if !receipt.delivered {
                        println!("  report not delivered via {}", receipt.channel);
                    }
                }
                if run.is_fatal() {
                    bail!("run {} finished with verdict {}", run.id, run.verdict());
                }
                if cancel.is_cancelled() {
                    bail!("run {} was interrupted; it was finalized and reported", run.id);
                }
                Ok(())
            }
        }
    }
}

/// The first SIGINT or SIGTERM cancels the run, which then finalizes with
/// whatever it has observed, reports and releases its lock. A second one
/// exits at once.
#[cfg(unix)]
fn cancel_on_signal(cancel: &CancelToken) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;
    let cancel = cancel.clone();
    std::thread::spawn(move || {
        let mut received = signals.forever();
        if let Some(signal) = received.next() {
            eprintln!("received signal {signal}; finishing the run (signal again to abort)");
            cancel.cancel();
        }
        if received.next().is_some() {
            std::process::exit(130);
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn cancel_on_signal(_cancel: &CancelToken) -> Result<()> {
    Ok(())
}

fn build_trigger(kind: TriggerKind, branch: String, commit: Option<String>) -> Result<Trigger> {
    Ok(match (kind, commit) {
        (TriggerKind::Push, Some(sha)) => Trigger::push(branch, CommitHash::from(sha.as_str())),
        (TriggerKind::Push, None) => bail!("--trigger push requires --commit <sha>"),
        (_, Some(_)) => bail!("--commit is only meaningful with --trigger push"),
        (TriggerKind::Schedule, None) => Trigger::schedule(branch),
        (TriggerKind::Manual, None) => Trigger::manual(branch),
    })
}

fn print_summary(run: &SyncRun) {
    if let Some(decision) = run.decision {
        println!("  decision:   {decision}");
    }
    println!("  outcome:    {}", run.outcome.label());
    if let Some(deployment) = &run.deployment {
        println!(
            "  deployment: {} after {} polls",
            deployment.state, deployment.polls
        );
    }
    for file in &run.archived_files {
        println!("  archived:   {file}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_trigger_needs_a_commit() {
        assert!(build_trigger(TriggerKind::Push, "main".into(), None).is_err());
        let trigger =
            build_trigger(TriggerKind::Push, "main".into(), Some("abc123".into())).unwrap();
        assert_eq!(trigger.commit.map(|c| c.0), Some("abc123".to_string()));
    }

    #[test]
    fn commit_rejected_for_other_triggers() {
        assert!(build_trigger(TriggerKind::Manual, "main".into(), Some("abc".into())).is_err());
        let trigger = build_trigger(TriggerKind::Schedule, "dev".into(), None).unwrap();
        assert_eq!(trigger.kind, TriggerKind::Schedule);
        assert_eq!(trigger.branch, "dev");
    }
}
