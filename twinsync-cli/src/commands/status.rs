//! `twinsync status`: last run of every registered pair.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use twinsync_core::{registry, RemotePair, SyncRun};
use twinsync_sync::{run_lock, run_store};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let pairs = registry::list_pairs_at(&home)
            .context("failed to load registry; run `twinsync init` first")?;

        let rows = pairs
            .iter()
            .map(|pair| pair_status(&home, pair))
            .collect::<Result<Vec<_>>>()?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(rows, Utc::now());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct PairStatus {
    pair: String,
    verdict: Option<String>,
    decision: Option<String>,
    outcome: Option<String>,
    deployment: Option<String>,
    run_id: Option<String>,
    finished_at: Option<DateTime<Utc>>,
    /// Trigger holding the run lock right now, if any.
    locked_by: Option<String>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "pair")]
    pair: String,
    #[tabled(rename = "verdict")]
    verdict: String,
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "deploy")]
    deployment: String,
    #[tabled(rename = "last run")]
    last_run: String,
    #[tabled(rename = "lock")]
    lock: String,
}

fn pair_status(home: &Path, pair: &RemotePair) -> Result<PairStatus> {
    let last = run_store::load_last_at(home, &pair.name)
        .with_context(|| format!("failed to read last run of '{}'", pair.name))?;
    let locked_by = match run_lock::read_lock_at(home, pair) {
        Ok(meta) => meta.map(|m| format!("{} (pid {})", m.trigger, m.pid)),
        Err(err) => Some(format!("unreadable: {err}")),
    };
    Ok(from_run(pair, last.as_ref(), locked_by))
}

fn from_run(pair: &RemotePair, run: Option<&SyncRun>, locked_by: Option<String>) -> PairStatus {
    PairStatus {
        pair: pair.name.0.clone(),
        verdict: run.map(|r| r.verdict().to_string()),
        decision: run.and_then(|r| r.decision).map(|d| d.to_string()),
        outcome: run.map(|r| r.outcome.label().to_string()),
        deployment: run
            .and_then(|r| r.deployment.as_ref())
            .map(|d| d.state.to_string()),
        run_id: run.map(|r| r.id.0.clone()),
        finished_at: run.map(|r| r.finished_at),
        locked_by,
    }
}

fn print_table(rows: Vec<PairStatus>, now: DateTime<Utc>) {
    let failing = rows
        .iter()
        .filter(|r| !matches!(r.verdict.as_deref(), None | Some("OK")))
        .count();
    println!(
        "twinsync v{} | {} pairs | {} need attention",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        failing,
    );
    if rows.is_empty() {
        println!("No pairs registered.");
        return;
    }

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            pair: row.pair,
            verdict: colorize_verdict(row.verdict.as_deref()),
            outcome: row.outcome.unwrap_or_else(|| "-".to_string()),
            deployment: row.deployment.unwrap_or_else(|| "-".to_string()),
            last_run: row
                .finished_at
                .map(|at| format_age(at, now))
                .unwrap_or_else(|| "never".to_string()),
            lock: row.locked_by.unwrap_or_else(|| "free".to_string()),
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    if failing > 0 {
        println!("Run 'twinsync report <pair>' for details.");
    }
}

fn colorize_verdict(verdict: Option<&str>) -> String {
    match verdict {
        None => "NEVER RUN".bright_black().to_string(),
        Some("OK") => "OK".green().bold().to_string(),
        Some(v @ "DEGRADED") => v.yellow().bold().to_string(),
        Some(v @ "ACTION REQUIRED") => v.magenta().bold().to_string(),
        Some(v) => v.red().bold().to_string(),
    }
}

fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
