//! Shared fixtures: bare git remotes in a temp dir and in-memory fakes for
//! the hosted API and the notification channel.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use twinsync_core::{LogSource, PairName, RemotePair, RemoteSpec};
use twinsync_sync::hosted::{HostedApi, HostedApiError, RuntimeStatus};
use twinsync_sync::notify::{Notification, Notifier, NotifyError};
use twinsync_sync::pipeline::Collaborators;

static SCRATCH: AtomicUsize = AtomicUsize::new(0);

/// Run git in `dir`, panicking with stderr on failure. Returns trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    git_env(dir, args, &[])
}

pub fn git_env(dir: &Path, args: &[&str], env: &[(&str, String)]) -> String {
    let mut cmd = Command::new("git");
    cmd.args(["-c", "user.name=fixture", "-c", "user.email=fixture@localhost"])
        .args(["-c", "commit.gpgsign=false", "-c", "advice.detachedHead=false"])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0");
    for (k, v) in env {
        cmd.env(k, v);
    }
    let out = cmd.output().expect("spawn git");
    assert!(
        out.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Two bare remotes plus an isolated home directory.
pub struct Fixture {
    pub tmp: TempDir,
    pub home: PathBuf,
    pub source: PathBuf,
    pub hosted: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let tmp = TempDir::new().expect("tempdir");
        let home = tmp.path().join("home");
        std::fs::create_dir_all(&home).expect("home");
        let source = tmp.path().join("source.git");
        let hosted = tmp.path().join("hosted.git");
        for remote in [&source, &hosted] {
            std::fs::create_dir_all(remote).expect("remote dir");
            git(remote, &["init", "--bare", "-q"]);
            git(remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        }
        Fixture {
            tmp,
            home,
            source,
            hosted,
        }
    }

    /// A pair over both remotes with fast monitor settings.
    pub fn pair(&self, name: &str) -> RemotePair {
        let mut pair = RemotePair::new(
            PairName::from(name),
            RemoteSpec::new(self.source.to_string_lossy(), "main"),
            RemoteSpec::new(self.hosted.to_string_lossy(), "main"),
        );
        pair.monitor.timeout_secs = 30;
        pair.monitor.poll_interval_secs = 1;
        pair
    }

    /// Commit `files` at unix time `t` on top of `base` (remote, branch), or
    /// as a root commit, and force it onto `remote`'s `main`.
    pub fn commit(
        &self,
        remote: &Path,
        base: Option<&Path>,
        files: &[(&str, &str)],
        t: i64,
        message: &str,
    ) -> String {
        let n = SCRATCH.fetch_add(1, Ordering::SeqCst);
        let scratch = self.tmp.path().join(format!("scratch-{n}"));
        std::fs::create_dir_all(&scratch).expect("scratch");
        git(&scratch, &["init", "-q"]);
        if let Some(base) = base {
            let base = base.to_string_lossy();
            git(&scratch, &["fetch", "-q", &base, "refs/heads/main"]);
            git(&scratch, &["checkout", "-q", "FETCH_HEAD"]);
        }
        for (path, contents) in files {
            let full = scratch.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).expect("parent");
            }
            std::fs::write(full, contents).expect("write");
        }
        git(&scratch, &["add", "-A"]);
        let date = format!("@{t} +0000");
        git_env(
            &scratch,
            &["commit", "-q", "-m", message],
            &[("GIT_AUTHOR_DATE", date.clone()), ("GIT_COMMITTER_DATE", date)],
        );
        let remote = remote.to_string_lossy();
        git(&scratch, &["push", "-q", "--force", &remote, "HEAD:refs/heads/main"]);
        let sha = git(&scratch, &["rev-parse", "HEAD"]);
        let _ = std::fs::remove_dir_all(&scratch);
        sha
    }

    /// Make `to`'s `main` identical to `from`'s.
    pub fn mirror(&self, from: &Path, to: &Path) {
        let to = to.to_string_lossy();
        git(from, &["push", "-q", "--force", &to, "refs/heads/main:refs/heads/main"]);
    }

    /// Install a `pre-receive` hook on a bare remote that prints `message`
    /// and declines every push.
    #[cfg(unix)]
    pub fn decline_pushes(&self, remote: &Path, message: &str) {
        use std::os::unix::fs::PermissionsExt;
        let hook = remote.join("hooks").join("pre-receive");
        std::fs::create_dir_all(hook.parent().expect("hooks dir")).expect("hooks dir");
        std::fs::write(&hook, format!("#!/bin/sh\necho '{message}' >&2\nexit 1\n"))
            .expect("write hook");
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    pub fn tip(&self, remote: &Path) -> String {
        git(remote, &["rev-parse", "refs/heads/main"])
    }

    pub fn is_ancestor(&self, remote: &Path, ancestor: &str, of: &str) -> bool {
        Command::new("git")
            .args(["merge-base", "--is-ancestor", ancestor, of])
            .current_dir(remote)
            .status()
            .expect("spawn git")
            .success()
    }

    pub fn files_at(&self, remote: &Path, rev: &str) -> Vec<String> {
        git(remote, &["ls-tree", "-r", "--name-only", rev])
            .lines()
            .map(str::to_string)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Replays runtime stages for one commit; the last stage repeats.
pub struct FakeHosted {
    stages: Mutex<Vec<&'static str>>,
    sha: Mutex<String>,
    build: Vec<String>,
    runtime: Vec<String>,
}

impl FakeHosted {
    pub fn new(sha: &str, stages: Vec<&'static str>) -> Self {
        FakeHosted {
            stages: Mutex::new(stages),
            sha: Mutex::new(sha.to_string()),
            build: Vec::new(),
            runtime: Vec::new(),
        }
    }

    pub fn with_logs(mut self, build: &[&str], runtime: &[&str], at: DateTime<Utc>) -> Self {
        self.build = build.iter().map(|t| sse(t, at)).collect();
        self.runtime = runtime.iter().map(|t| sse(t, at)).collect();
        self
    }
}

fn sse(text: &str, at: DateTime<Utc>) -> String {
    format!(
        "data: {}",
        serde_json::json!({ "data": text, "timestamp": at.to_rfc3339() })
    )
}

impl HostedApi for FakeHosted {
    fn status(&self) -> Result<RuntimeStatus, HostedApiError> {
        let mut stages = self.stages.lock().expect("stages");
        let stage = if stages.len() > 1 {
            stages.remove(0)
        } else {
            stages[0]
        };
        Ok(RuntimeStatus {
            stage: stage.to_string(),
            sha: Some(self.sha.lock().expect("sha").clone()),
            error_message: None,
        })
    }

    fn log_lines(&self, source: LogSource) -> Result<Vec<String>, HostedApiError> {
        Ok(match source {
            LogSource::Build => self.build.clone(),
            LogSource::Runtime => self.runtime.clone(),
        })
    }
}

/// Keeps every notification it is handed.
#[derive(Clone, Default)]
pub struct Recorder {
    pub sent: Arc<Mutex<Vec<Notification>>>,
}

impl Recorder {
    pub fn last(&self) -> Notification {
        self.sent
            .lock()
            .expect("sent")
            .last()
            .cloned()
            .expect("a notification was sent")
    }

    pub fn count(&self) -> usize {
        self.sent.lock().expect("sent").len()
    }
}

impl Notifier for Recorder {
    fn channel(&self) -> &'static str {
        "recorder"
    }

    fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().expect("sent").push(n.clone());
        Ok(())
    }
}

pub fn collaborators(hosted: Option<FakeHosted>, recorder: &Recorder) -> Collaborators {
    Collaborators {
        hosted_api: hosted.map(|h| Box::new(h) as Box<dyn HostedApi>),
        notifier: Box::new(recorder.clone()),
    }
}
