//! Commit collected deployment logs back into the source remote.
//!
//! Files land in `<archive_dir>/build_<stamp>.log` and
//! `<archive_dir>/run_<stamp>.log` on the source branch.

use std::path::{Component, Path};

use chrono::{DateTime, Utc};

use twinsync_core::{LogEntry, LogSettings, LogSource, RemoteRole, RemoteSpec};

use crate::error::{io_err, SyncError};
use crate::git::WorkingCopy;
use crate::snapshot::read_snapshot;

/// Archive `entries` and push the commit (non-forced) to the source remote.
///
/// Returns the repository-relative paths written; empty when there was
/// nothing to archive.
pub fn archive_logs(
    wc: &WorkingCopy,
    source_remote: &RemoteSpec,
    settings: &LogSettings,
    entries: &[LogEntry],
    stamp: DateTime<Utc>,
) -> Result<Vec<String>, SyncError> {
    if entries.is_empty() {
        return Ok(vec![]);
    }
    let dir = archive_dir(&settings.archive_dir)?;

    // Source may have moved since the run started (e.g. a merge was pushed).
    let tip = read_snapshot(wc, RemoteRole::Source, source_remote)?;
    wc.checkout_clean(&tip.commit.0)?;

    let abs_dir = wc.path().join(&dir);
    std::fs::create_dir_all(&abs_dir).map_err(|e| io_err(&abs_dir, e))?;

    let stamp = stamp.format("%Y%m%dT%H%M%SZ").to_string();
    let mut written = Vec::new();
    for (source, prefix) in [(LogSource::Build, "build"), (LogSource::Runtime, "run")] {
        let lines: Vec<String> = entries
            .iter()
            .filter(|e| e.source == source)
            .map(|e| format!("[{}] {}", e.timestamp.to_rfc3339(), e.text))
            .collect();
        if lines.is_empty() {
            continue;
        }
        let rel = format!("{dir}/{prefix}_{stamp}.log");
        let abs = wc.path().join(&rel);
        std::fs::write(&abs, lines.join("\n") + "\n").map_err(|e| io_err(&abs, e))?;
        written.push(rel);
    }

    let mut add = vec!["add", "--"];
    add.extend(written.iter().map(String::as_str));
    wc.run(&add)?;
    wc.run(&["commit", "-q", "-m", &settings.commit_message])?;

    let url = source_remote.authenticated_url();
    let refspec = format!("HEAD:refs/heads/{}", source_remote.branch);
    let pushed = wc.output(&["push", "-q", &url, &refspec])?;
    if !pushed.success {
        return Err(SyncError::RemoteRejected {
            remote: RemoteRole::Source,
            detail: pushed.stderr,
        });
    }
    tracing::info!("archived {} log file(s) to source", written.len());
    Ok(written)
}

/// `archive_dir` as a forward-slash relative path inside the repository.
fn archive_dir(dir: &Path) -> Result<String, SyncError> {
    let mut parts = Vec::new();
    for c in dir.components() {
        match c {
            Component::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(io_err(
                    dir,
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "archive_dir must be a relative path inside the repository",
                    ),
                ))
            }
        }
    }
    if parts.is_empty() {
        return Err(io_err(
            dir,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "archive_dir is empty"),
        ));
    }
    Ok(parts.join("/"))
}

/// Every path lies under `dir` (the archive directory).
pub fn only_archive_paths(paths: &[String], dir: &Path) -> bool {
    let Ok(dir) = archive_dir(dir) else {
        return false;
    };
    let prefix = format!("{dir}/");
    !paths.is_empty() && paths.iter().all(|p| p.starts_with(&prefix))
}
