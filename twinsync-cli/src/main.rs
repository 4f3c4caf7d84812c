//! twinsync: keep a source git remote and a hosted deployment remote in step.
//!
//! # Usage
//!
//! ```text
//! twinsync init <pair> --source <url> --hosted <url> [--space <owner/name>]
//! twinsync pair list
//! twinsync pair show <pair>
//! twinsync plan <pair>
//! twinsync run <pair> [--trigger push|schedule|manual] [--commit <sha>] [--branch <b>]
//! twinsync status [--json]
//! twinsync report <pair>
//! twinsync unlock <pair>
//! twinsync daemon start|stop|status|logs|trigger
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, init::InitArgs, pair::PairCommand, plan::PlanArgs,
    report::ReportArgs, run::RunArgs, status::StatusArgs, unlock::UnlockArgs,
};
use twinsync_core::TriggerKind;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "twinsync",
    version,
    about = "Keep a source git remote and a hosted deployment remote in sync",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a remote pair.
    Init(InitArgs),

    /// Inspect registered pairs.
    Pair {
        #[command(subcommand)]
        command: PairCommand,
    },

    /// Read both remotes and print the decision without acting on it.
    Plan(PlanArgs),

    /// Execute one run for a pair.
    ///
    /// When the source remote is newer, the hosted branch is FORCE-OVERWRITTEN
    /// with the source tip: commits that exist only on the hosted remote are
    /// discarded. Use `twinsync plan` first when in doubt.
    Run(RunArgs),

    /// Show the last run of every pair.
    Status(StatusArgs),

    /// Re-render the report of a pair's last run.
    Report(ReportArgs),

    /// Remove a pair's run lock left behind by a crashed run.
    Unlock(UnlockArgs),

    /// Manage the background daemon (schedule loop + socket).
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared TriggerKind argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `TriggerKind` from CLI args.
#[derive(Debug, Clone, Copy)]
pub struct TriggerArg(pub TriggerKind);

impl Default for TriggerArg {
    fn default() -> Self {
        Self(TriggerKind::Manual)
    }
}

impl FromStr for TriggerArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "push" => Ok(Self(TriggerKind::Push)),
            "schedule" => Ok(Self(TriggerKind::Schedule)),
            "manual" => Ok(Self(TriggerKind::Manual)),
            other => Err(format!(
                "unknown trigger '{other}'; expected: push, schedule, manual"
            )),
        }
    }
}

impl fmt::Display for TriggerArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Daemon { .. }) {
        init_logging();
    }
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Pair { command } => commands::pair::run(command),
        Commands::Plan(args) => args.run(),
        Commands::Run(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Report(args) => args.run(),
        Commands::Unlock(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

/// Library log records go to stderr; `RUST_LOG` overrides the `info` default.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
