//! Thin wrapper around the `git` binary.
//!
//! Every run works inside an engine-private working copy at
//! `~/.twinsync/work/<pair>/`. Remotes are addressed by URL on each command,
//! never stored in `.git/config`, so tokens injected into URLs do not persist
//! on disk. Arguments and stderr are redacted before they reach a log line or
//! an error message.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use twinsync_core::types::redact_url;
use twinsync_core::{CommitHash, MergeSettings, PairName};

#[derive(Debug, Error)]
pub enum GitError {
    /// The git binary could not be started.
    #[error("failed to run git: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    /// git exited non-zero.
    #[error("`git {args}` failed ({code}): {stderr}")]
    Failed {
        args: String,
        code: String,
        stderr: String,
    },

    /// git output did not have the expected shape.
    #[error("unexpected output from `git {args}`: {output}")]
    Parse { args: String, output: String },

    #[error("working copy I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Raw result of a git invocation whose exit status the caller interprets.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    /// Already redacted.
    pub stderr: String,
}

/// Replace any URL userinfo in free text (stderr, argument lists) with `***`.
/// Whitespace between words is kept as it was.
pub fn redact(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for piece in text.split_inclusive(char::is_whitespace) {
        let word = piece.trim_end_matches(char::is_whitespace);
        if word.contains("://") {
            out.push_str(&redact_url(word));
        } else {
            out.push_str(word);
        }
        out.push_str(&piece[word.len()..]);
    }
    out
}

// ---------------------------------------------------------------------------
// WorkingCopy
// ---------------------------------------------------------------------------

/// `<home>/.twinsync/work/<pair>/`
pub fn work_dir_at(home: &Path, pair: &PairName) -> PathBuf {
    home.join(".twinsync").join("work").join(&pair.0)
}

/// The engine's private, non-bare clone used for fetch/merge/push.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
    dir: PathBuf,
    author_name: String,
    author_email: String,
}

impl WorkingCopy {
    /// Open (initializing on first use) the working copy for `pair`.
    pub fn open_at(home: &Path, pair: &PairName, merge: &MergeSettings) -> Result<Self, GitError> {
        Self::open_dir(work_dir_at(home, pair), merge)
    }

    /// Open (initializing on first use) a working copy at an explicit path.
    pub fn open_dir(dir: PathBuf, merge: &MergeSettings) -> Result<Self, GitError> {
        std::fs::create_dir_all(&dir).map_err(|source| GitError::Io {
            path: dir.clone(),
            source,
        })?;
        let wc = WorkingCopy {
            dir,
            author_name: merge.author_name.clone(),
            author_email: merge.author_email.clone(),
        };
        if !wc.dir.join(".git").exists() {
            tracing::info!("initializing working copy at {}", wc.dir.display());
            wc.run(&["init", "-q"])?;
        }
        Ok(wc)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Run git and return the raw output; a non-zero exit is not an error.
    pub fn output(&self, args: &[&str]) -> Result<GitOutput, GitError> {
        let shown = redact(&args.join(" "));
        tracing::debug!("git {shown}");
        let out = Command::new("git")
            .arg("-c")
            .arg(format!("user.name={}", self.author_name))
            .arg("-c")
            .arg(format!("user.email={}", self.author_email))
            .args(["-c", "commit.gpgsign=false", "-c", "advice.detachedHead=false"])
            .args(args)
            .current_dir(&self.dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .output()
            .map_err(|source| GitError::Spawn { source })?;
        Ok(GitOutput {
            success: out.status.success(),
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: redact(String::from_utf8_lossy(&out.stderr).trim()),
        })
    }

    /// Run git, failing on a non-zero exit. Returns trimmed stdout.
    pub fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let out = self.output(args)?;
        if !out.success {
            return Err(failed(args, &out));
        }
        Ok(out.stdout.trim().to_string())
    }

    /// Commit currently checked out.
    pub fn head(&self) -> Result<CommitHash, GitError> {
        self.run(&["rev-parse", "HEAD"]).map(CommitHash::from)
    }

    /// Hash and committer time of `rev`.
    pub fn commit_info(&self, rev: &str) -> Result<(CommitHash, DateTime<Utc>), GitError> {
        let args = ["log", "-1", "--format=%H %ct", rev];
        let out = self.run(&args)?;
        parse_commit_line(&out).ok_or_else(|| GitError::Parse {
            args: args.join(" "),
            output: out,
        })
    }

    /// Check out `rev` detached, discarding any leftover state in the tree.
    pub fn checkout_clean(&self, rev: &str) -> Result<(), GitError> {
        // A previous run may have been killed mid-merge.
        let _ = self.output(&["merge", "--abort"]);
        self.run(&["checkout", "-q", "-f", "--detach", rev])?;
        self.run(&["clean", "-q", "-fdx"])?;
        Ok(())
    }

    /// Paths that differ between two commits.
    pub fn changed_paths(&self, from: &str, to: &str) -> Result<Vec<String>, GitError> {
        let out = self.run(&["diff", "--name-only", from, to])?;
        Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }
}

pub(crate) fn failed(args: &[&str], out: &GitOutput) -> GitError {
    GitError::Failed {
        args: redact(&args.join(" ")),
        code: out
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string()),
        stderr: out.stderr.clone(),
    }
}

/// Parse `<sha> <unix seconds>`.
fn parse_commit_line(line: &str) -> Option<(CommitHash, DateTime<Utc>)> {
    let mut parts = line.split_whitespace();
    let sha = parts.next()?;
    let secs: i64 = parts.next()?.parse().ok()?;
    let at = Utc.timestamp_opt(secs, 0).single()?;
    Some((CommitHash::from(sha), at))
}

/// First hash in `git ls-remote` output, if any.
pub(crate) fn parse_ls_remote(stdout: &str) -> Option<CommitHash> {
    stdout
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .find(|sha| !sha.is_empty())
        .map(CommitHash::from)
}
