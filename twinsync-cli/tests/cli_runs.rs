use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn twinsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("twinsync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("RUST_LOG", "warn");
    cmd
}

fn git(dir: &Path, args: &[&str], date: Option<i64>) -> String {
    let mut cmd = Command::new("git");
    cmd.args(["-c", "user.name=fixture", "-c", "user.email=fixture@localhost"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir);
    if let Some(t) = date {
        let stamp = format!("@{t} +0000");
        cmd.env("GIT_AUTHOR_DATE", &stamp)
            .env("GIT_COMMITTER_DATE", &stamp);
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

struct Remotes {
    tmp: TempDir,
    source: PathBuf,
    hosted: PathBuf,
}

impl Remotes {
    /// Both remotes at a shared first commit (t=50), then a newer source commit (t=100).
    fn source_ahead() -> Self {
        let tmp = TempDir::new().expect("tmp");
        let source = tmp.path().join("source.git");
        let hosted = tmp.path().join("hosted.git");
        for remote in [&source, &hosted] {
            fs::create_dir_all(remote).expect("remote dir");
            git(remote, &["init", "--bare", "-q"], None);
            git(remote, &["symbolic-ref", "HEAD", "refs/heads/main"], None);
        }

        let work = tmp.path().join("work");
        fs::create_dir_all(&work).expect("work dir");
        git(&work, &["init", "-q", "-b", "main"], None);
        fs::write(work.join("app.py"), "v1\n").expect("write");
        git(&work, &["add", "-A"], None);
        git(&work, &["commit", "-q", "-m", "S1"], Some(50));
        for remote in [&source, &hosted] {
            git(&work, &["push", "-q", &remote.to_string_lossy(), "HEAD:refs/heads/main"], None);
        }
        fs::write(work.join("app.py"), "v2\n").expect("write");
        git(&work, &["commit", "-q", "-am", "S2"], Some(100));
        git(&work, &["push", "-q", &source.to_string_lossy(), "HEAD:refs/heads/main"], None);

        Remotes { tmp, source, hosted }
    }

    fn tip(&self, remote: &Path) -> String {
        git(remote, &["rev-parse", "refs/heads/main"], None)
    }

    fn init(&self, home: &Path, name: &str) {
        twinsync_cmd(home)
            .args(["init", name, "--source"])
            .arg(&self.source)
            .arg("--hosted")
            .arg(&self.hosted)
            .assert()
            .success()
            .stdout(contains(format!("Registered pair '{name}'")));
    }
}

#[test]
fn init_then_list_and_show() {
    let home = TempDir::new().expect("home");
    let remotes = Remotes::source_ahead();
    remotes.init(home.path(), "eew");

    twinsync_cmd(home.path())
        .args(["pair", "list"])
        .assert()
        .success()
        .stdout(contains("eew"));
    twinsync_cmd(home.path())
        .args(["pair", "show", "eew"])
        .assert()
        .success()
        .stdout(contains("space:     none"))
        .stdout(contains("every 21600s"));
}

#[test]
fn plan_does_not_touch_hosted() {
    let home = TempDir::new().expect("home");
    let remotes = Remotes::source_ahead();
    remotes.init(home.path(), "eew");
    let before = remotes.tip(&remotes.hosted);

    twinsync_cmd(home.path())
        .args(["plan", "eew"])
        .assert()
        .success()
        .stdout(contains("decision: push-forward"));
    assert_eq!(remotes.tip(&remotes.hosted), before);
}

#[test]
fn run_pushes_forward_then_status_and_report_show_it() {
    let home = TempDir::new().expect("home");
    let remotes = Remotes::source_ahead();
    remotes.init(home.path(), "eew");

    twinsync_cmd(home.path())
        .args(["run", "eew"])
        .assert()
        .success()
        .stdout(contains("[twinsync] OK: eew pushed"))
        .stdout(contains("decision:   push-forward"));
    assert_eq!(remotes.tip(&remotes.hosted), remotes.tip(&remotes.source));

    let assert = twinsync_cmd(home.path())
        .args(["status", "--json"])
        .assert()
        .success();
    let rows: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("status json");
    assert_eq!(rows[0]["pair"], "eew");
    assert_eq!(rows[0]["verdict"], "OK");
    assert_eq!(rows[0]["outcome"], "pushed");
    assert_eq!(rows[0]["locked_by"], serde_json::Value::Null);

    twinsync_cmd(home.path())
        .args(["report", "eew"])
        .assert()
        .success()
        .stdout(contains("Subject: [twinsync] OK: eew pushed"));

    // Second run sees equal tips.
    twinsync_cmd(home.path())
        .args(["run", "eew", "--trigger", "schedule"])
        .assert()
        .success()
        .stdout(contains("eew no-op"));
    drop(remotes.tmp);
}

#[test]
fn trigger_for_other_branch_is_skipped() {
    let home = TempDir::new().expect("home");
    let remotes = Remotes::source_ahead();
    remotes.init(home.path(), "eew");
    let before = remotes.tip(&remotes.hosted);

    twinsync_cmd(home.path())
        .args(["run", "eew", "--trigger", "push", "--commit", "deadbeef", "--branch", "feature"])
        .assert()
        .success()
        .stdout(contains("skipped:"));
    assert_eq!(remotes.tip(&remotes.hosted), before);
}

#[test]
fn push_trigger_without_commit_is_rejected() {
    let home = TempDir::new().expect("home");
    let remotes = Remotes::source_ahead();
    remotes.init(home.path(), "eew");

    twinsync_cmd(home.path())
        .args(["run", "eew", "--trigger", "push"])
        .assert()
        .failure()
        .stderr(contains("requires --commit"));
}

#[test]
fn unknown_pair_fails_with_hint() {
    let home = TempDir::new().expect("home");
    twinsync_cmd(home.path())
        .args(["run", "ghost"])
        .assert()
        .failure()
        .stderr(contains("twinsync init"));
}

#[test]
fn report_before_first_run_fails() {
    let home = TempDir::new().expect("home");
    let remotes = Remotes::source_ahead();
    remotes.init(home.path(), "eew");

    twinsync_cmd(home.path())
        .args(["report", "eew"])
        .assert()
        .failure()
        .stderr(contains("has not run yet"));
}

#[test]
fn unlock_reports_free_pair() {
    let home = TempDir::new().expect("home");
    let remotes = Remotes::source_ahead();
    remotes.init(home.path(), "eew");

    twinsync_cmd(home.path())
        .args(["unlock", "eew"])
        .assert()
        .success()
        .stdout(contains("'eew' is not locked"));
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().expect("home");
    twinsync_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
    twinsync_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}

#[test]
fn run_help_warns_about_hosted_overwrite() {
    let home = TempDir::new().expect("home");
    twinsync_cmd(home.path())
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(contains("FORCE-OVERWRITTEN"));
}

#[test]
fn plan_and_unlock_refuse_while_a_run_holds_the_pair() {
    let home = TempDir::new().expect("home");
    let remotes = Remotes::source_ahead();
    remotes.init(home.path(), "eew");
    let pair = twinsync_core::registry::load_pair_at(home.path(), &"eew".into()).expect("pair");
    let held = twinsync_sync::run_lock::RunLock::try_acquire_at(
        home.path(),
        &pair,
        twinsync_core::TriggerKind::Schedule,
    )
    .expect("lock");

    twinsync_cmd(home.path())
        .args(["plan", "eew"])
        .assert()
        .failure()
        .stderr(contains("already held"));
    twinsync_cmd(home.path())
        .args(["unlock", "eew"])
        .assert()
        .failure()
        .stderr(contains("live run"));

    drop(held);
    twinsync_cmd(home.path())
        .args(["plan", "eew"])
        .assert()
        .success()
        .stdout(contains("decision: push-forward"));
}

#[cfg(unix)]
mod interrupted {
    use super::*;

    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    use twinsync_core::{registry, PairName};

    /// A hosted platform whose deployment never leaves BUILDING.
    fn building_space() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let body = r#"{"stage":"BUILDING"}"#;
                let _ = write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn sigint_while_monitoring_finalizes_reports_and_unlocks() {
        let home = TempDir::new().expect("home");
        let remotes = Remotes::source_ahead();
        let api = building_space();
        twinsync_cmd(home.path())
            .args(["init", "eew", "--source"])
            .arg(&remotes.source)
            .arg("--hosted")
            .arg(&remotes.hosted)
            .args(["--space", "acme/eew", "--api-base", &api])
            .assert()
            .success();
        let name = PairName::from("eew");
        let mut pair = registry::load_pair_at(home.path(), &name).expect("pair");
        pair.monitor.poll_interval_secs = 1;
        pair.monitor.timeout_secs = 300;
        registry::save_pair_at(home.path(), &pair).expect("save pair");

        let source_tip = remotes.tip(&remotes.source);
        let mut child = twinsync_cmd(home.path())
            .args(["run", "eew"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn run");

        let deadline = Instant::now() + Duration::from_secs(30);
        while remotes.tip(&remotes.hosted) != source_tip {
            assert!(Instant::now() < deadline, "push-forward never happened");
            std::thread::sleep(Duration::from_millis(100));
        }
        std::thread::sleep(Duration::from_secs(2));
        let killed = Command::new("kill")
            .args(["-INT", &child.id().to_string()])
            .status()
            .expect("spawn kill");
        assert!(killed.success());

        let deadline = Instant::now() + Duration::from_secs(30);
        let exit = loop {
            if let Some(exit) = child.try_wait().expect("try_wait") {
                break exit;
            }
            if Instant::now() > deadline {
                let _ = child.kill();
                panic!("run kept monitoring after SIGINT");
            }
            std::thread::sleep(Duration::from_millis(100));
        };
        let output = child.wait_with_output().expect("output");
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert_eq!(exit.code(), Some(1), "stdout: {stdout}\nstderr: {stderr}");
        assert!(stdout.contains("deployment: unknown"), "{stdout}");
        assert!(stderr.contains("interrupted"), "{stderr}");

        let stored = fs::read_to_string(home.path().join(".twinsync/runs/eew.json"))
            .expect("finalized run stored");
        assert!(stored.contains("\"unknown\""), "{stored}");
        let reports = fs::read_dir(home.path().join(".twinsync/outbox"))
            .expect("outbox")
            .count();
        assert_eq!(reports, 1);

        let assert = twinsync_cmd(home.path())
            .args(["status", "--json"])
            .assert()
            .success();
        let rows: serde_json::Value =
            serde_json::from_slice(&assert.get_output().stdout).expect("status json");
        assert_eq!(rows[0]["locked_by"], serde_json::Value::Null);
        assert_eq!(rows[0]["deployment"], "unknown");
    }
}
