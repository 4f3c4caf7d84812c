//! `twinsync pair list` and `twinsync pair show <pair>`

use anyhow::{Context, Result};
use clap::Subcommand;

use twinsync_core::{registry, RemotePair};

#[derive(Subcommand, Debug)]
pub enum PairCommand {
    /// List all registered pairs.
    List,

    /// Print one pair's effective configuration (tokens redacted).
    Show {
        /// Pair name.
        name: String,
    },
}

pub fn run(cmd: PairCommand) -> Result<()> {
    let home = super::home_dir()?;
    match cmd {
        PairCommand::List => {
            let pairs = registry::list_pairs_at(&home)
                .context("failed to load registry; run `twinsync init` first")?;
            if pairs.is_empty() {
                println!("No pairs registered.");
                println!("Run: twinsync init <pair> --source <url> --hosted <url>");
                return Ok(());
            }
            for pair in &pairs {
                println!(
                    "{}  {} → {}",
                    pair.name,
                    pair.source.display_url(),
                    pair.hosted.display_url()
                );
            }
            Ok(())
        }
        PairCommand::Show { name } => {
            let pair = super::load_pair(&home, &name)?;
            print!("{}", describe(&pair));
            Ok(())
        }
    }
}

fn describe(pair: &RemotePair) -> String {
    let token = |literal: &Option<String>, env: &Option<String>| match (literal, env) {
        (Some(_), _) => "literal (redacted)".to_string(),
        (None, Some(var)) => format!("${var}"),
        (None, None) => "none".to_string(),
    };
    let mut out = String::new();
    out.push_str(&format!("name:      {}\n", pair.name));
    out.push_str(&format!(
        "source:    {} [{}] token: {}\n",
        pair.source.display_url(),
        pair.source.branch,
        token(&pair.source.token, &pair.source.token_env)
    ));
    out.push_str(&format!(
        "hosted:    {} [{}] token: {}\n",
        pair.hosted.display_url(),
        pair.hosted.branch,
        token(&pair.hosted.token, &pair.hosted.token_env)
    ));
    match &pair.hosted_api {
        Some(api) => out.push_str(&format!("space:     {} @ {}\n", api.space_id, api.base_url)),
        None => out.push_str("space:     none (deployment monitoring off)\n"),
    }
    out.push_str(&format!(
        "monitor:   timeout {}s, poll every {}s\n",
        pair.monitor.timeout_secs, pair.monitor.poll_interval_secs
    ));
    out.push_str(&format!(
        "logs:      archive {} → {}\n",
        if pair.logs.archive { "on" } else { "off" },
        pair.logs.archive_dir.display()
    ));
    out.push_str(&format!("notify:    {}\n", pair.notify));
    out.push_str(&format!(
        "schedule:  {}\n",
        if pair.schedule.enabled {
            format!("every {}s", pair.schedule.interval_secs)
        } else {
            "disabled".to_string()
        }
    ));
    out.push_str(&format!("lock:      wait {}s\n", pair.lock.wait_secs));
    out
}
