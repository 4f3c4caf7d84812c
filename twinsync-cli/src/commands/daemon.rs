//! `twinsync daemon`: background schedule loop and its socket clients.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use twinsync_daemon::paths::{socket_path, stderr_log_path, stdout_log_path};
use twinsync_daemon::{
    request_run, request_status, request_stop, start_blocking, DaemonError, LogTarget,
};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (schedule loop + watcher + socket).
    Start(DaemonStartArgs),
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Print recent daemon log lines.
    Logs(DaemonLogsArgs),
    /// Ask the running daemon to run a pair now and wait for the result.
    Trigger {
        /// Pair name.
        name: String,
    },
}

#[derive(Args, Debug)]
pub struct DaemonStartArgs {
    /// Log to stdout instead of ~/.twinsync/logs/.
    #[arg(long)]
    pub stdout: bool,
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Show only the warnings/errors log file.
    #[arg(long)]
    pub stderr_only: bool,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home_dir()?;

    match command {
        DaemonCommand::Start(args) => {
            let target = if args.stdout {
                LogTarget::Stdout
            } else {
                println!(
                    "twinsync daemon running; logs in {}",
                    stdout_log_path(&home).display()
                );
                LogTarget::Files
            };
            start_blocking(&home, target).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => {
            let payload = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload)
                    .context("failed to render daemon status JSON")?
            );
        }
        DaemonCommand::Logs(args) => {
            if !args.stderr_only {
                print_tail(&stdout_log_path(&home), args.lines)
                    .context("failed to read daemon log")?;
            }
            print_tail(&stderr_log_path(&home), args.lines)
                .context("failed to read daemon error log")?;
        }
        DaemonCommand::Trigger { name } => {
            let summary = request_run(&home, &name)
                .with_context(|| format!("daemon could not run '{name}'"))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("failed to render run summary")?
            );
        }
    }

    Ok(())
}

fn print_tail(path: &std::path::Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
