//! Shared run pipeline entrypoint used by CLI and daemon.
//!
//! One run: lock → snapshots → decision → merge or push → (monitor → logs →
//! archive) → report → unlock. Failures of the git steps abort the run; the
//! run is still finalized and reported with its fatal kind.

use std::path::Path;

use chrono::{DateTime, Utc};

use twinsync_core::{
    registry, CommitHash, PairName, RemotePair, RemoteRole, RemoteSnapshot, RunDraft,
    RunOutcome, SyncDecision, SyncRun, Trigger, TriggerKind,
};

use crate::archive::{archive_logs, only_archive_paths};
use crate::cancel::CancelToken;
use crate::decision::decide;
use crate::error::SyncError;
use crate::git::WorkingCopy;
use crate::hosted::{HostedApi, HttpHostedApi};
use crate::logs::collect_logs;
use crate::merge::{pull_back, MergeOutcome};
use crate::monitor::monitor;
use crate::notify::{notifier_for, Notifier};
use crate::push::push_forward;
use crate::reporter::{report_at, ReportReceipt};
use crate::run_lock::{RunLock, RunLockError};
use crate::snapshot::read_snapshot;

/// Log entries this much older than the push are still collected, to absorb
/// clock differences with the hosted platform.
const LOG_WINDOW_SLACK_SECS: i64 = 60;

/// External services a run talks to besides git.
pub struct Collaborators {
    /// `None` when the pair has no `hosted_api`; deployments are then not
    /// monitored and no logs are collected.
    pub hosted_api: Option<Box<dyn HostedApi>>,
    pub notifier: Box<dyn Notifier>,
}

impl Collaborators {
    /// Collaborators as configured by `pair`.
    pub fn from_pair(home: &Path, pair: &RemotePair) -> Self {
        let hosted_api = pair.hosted_api.as_ref().map(|spec| {
            Box::new(HttpHostedApi::new(spec, pair.hosted.resolve_token(), &pair.logs))
                as Box<dyn HostedApi>
        });
        Collaborators {
            hosted_api,
            notifier: notifier_for(home, pair),
        }
    }
}

#[derive(Debug)]
pub enum RunResult {
    /// The run executed (possibly aborting) and was reported.
    Completed {
        run: Box<SyncRun>,
        receipt: ReportReceipt,
    },
    /// The trigger was dropped before a run started.
    Skipped { reason: String },
}

/// Snapshots and decision without acting on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub source: RemoteSnapshot,
    pub hosted: RemoteSnapshot,
    pub decision: SyncDecision,
}

/// Load `name` from the registry and run it.
///
/// A pair that cannot be loaded produces no run; the failure is logged as a
/// fatal abort and returned.
pub fn run_pair_at(
    home: &Path,
    name: &PairName,
    trigger: Trigger,
    cancel: &CancelToken,
) -> Result<RunResult, SyncError> {
    let pair = match registry::load_pair_at(home, name) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!("run of '{name}' aborted before start: {e}");
            return Err(e.into());
        }
    };
    let collab = Collaborators::from_pair(home, &pair);
    run_at(home, &pair, trigger, &collab, cancel)
}

/// Execute one run of `pair` for `trigger`.
///
/// Returns `Err` only when the run lock itself is unusable; every other
/// failure is recorded in the returned run.
pub fn run_at(
    home: &Path,
    pair: &RemotePair,
    trigger: Trigger,
    collab: &Collaborators,
    cancel: &CancelToken,
) -> Result<RunResult, SyncError> {
    if trigger.branch != pair.source.branch {
        let reason = format!(
            "{} trigger for branch '{}' ignored; '{}' tracks '{}'",
            trigger.kind, trigger.branch, pair.name, pair.source.branch
        );
        tracing::info!("{reason}");
        return Ok(RunResult::Skipped { reason });
    }

    let lock = match RunLock::acquire_at(home, pair, trigger.kind, cancel) {
        Ok(lock) => lock,
        Err(e @ (RunLockError::Held { .. } | RunLockError::Cancelled)) => {
            let reason = format!("{} trigger for '{}' dropped: {e}", trigger.kind, pair.name);
            tracing::info!("{reason}");
            return Ok(RunResult::Skipped { reason });
        }
        Err(e) => return Err(e.into()),
    };

    let mut draft = SyncRun::start(pair.name.clone(), trigger, Utc::now());
    tracing::info!("run {} of '{}' started", draft.id, pair.name);

    let outcome = match execute(home, pair, &mut draft, collab, cancel) {
        Ok(outcome) => outcome,
        Err(e) => {
            let fatal = e.fatal_kind();
            tracing::error!("run {} of '{}' aborted ({fatal}): {e}", draft.id, pair.name);
            RunOutcome::Aborted {
                fatal,
                message: e.to_string(),
            }
        }
    };
    let run = draft.finalize(outcome, Utc::now());
    tracing::info!(
        "run {} of '{}' finished: {} ({})",
        run.id,
        run.pair,
        run.outcome.label(),
        run.verdict()
    );

    let receipt = report_at(home, &run, pair.logs.excerpt_entries, collab.notifier.as_ref());

    if let Err(e) = lock.release() {
        tracing::warn!("failed to release run lock for '{}': {e}", pair.name);
    }
    Ok(RunResult::Completed {
        run: Box::new(run),
        receipt,
    })
}

/// Read both snapshots and decide, touching neither remote.
///
/// Fetching goes through the run's working copy, so this holds the run lock
/// too and fails with [`RunLockError::Held`] instead of waiting.
pub fn plan_at(home: &Path, pair: &RemotePair) -> Result<Plan, SyncError> {
    let lock = RunLock::try_acquire_at(home, pair, TriggerKind::Manual)?;
    let wc = WorkingCopy::open_at(home, &pair.name, &pair.merge)?;
    let source = read_snapshot(&wc, RemoteRole::Source, &pair.source)?;
    let hosted = read_snapshot(&wc, RemoteRole::Hosted, &pair.hosted)?;
    lock.release()?;
    let decision = decide(&source, &hosted);
    Ok(Plan {
        source,
        hosted,
        decision,
    })
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn execute(
    home: &Path,
    pair: &RemotePair,
    draft: &mut RunDraft,
    collab: &Collaborators,
    cancel: &CancelToken,
) -> Result<RunOutcome, SyncError> {
    let wc = WorkingCopy::open_at(home, &pair.name, &pair.merge)?;

    let source = read_snapshot(&wc, RemoteRole::Source, &pair.source)?;
    draft.before.source = Some(source.clone());
    let hosted = read_snapshot(&wc, RemoteRole::Hosted, &pair.hosted)?;
    draft.before.hosted = Some(hosted.clone());

    let decision = decide(&source, &hosted);
    draft.decision = Some(decision);
    tracing::info!(
        "decision for '{}': {decision} (source {} vs hosted {})",
        pair.name,
        source.committed_at.to_rfc3339(),
        hosted.committed_at.to_rfc3339()
    );

    let outcome = match decision {
        SyncDecision::NoOp => RunOutcome::NoOp,
        SyncDecision::PullBack => {
            match pull_back(&wc, &pair.source, &source, &hosted, &pair.merge)? {
                MergeOutcome::Merged { source_tip } => RunOutcome::Merged { source_tip },
                MergeOutcome::ConflictAborted { paths } => RunOutcome::ConflictAborted { paths },
            }
        }
        SyncDecision::PushForward => {
            let changed = wc.changed_paths(&hosted.commit.0, &source.commit.0)?;
            if only_archive_paths(&changed, &pair.logs.archive_dir) {
                let reason = format!(
                    "source differs from hosted only under {}",
                    pair.logs.archive_dir.display()
                );
                tracing::info!("push-forward skipped: {reason}");
                RunOutcome::Skipped { reason }
            } else {
                let pushed_at = Utc::now();
                let hosted_tip = push_forward(&wc, &pair.hosted, &source)?;
                after_push(pair, &wc, draft, collab, cancel, &hosted_tip, pushed_at);
                RunOutcome::Pushed { hosted_tip }
            }
        }
    };

    read_after(pair, &wc, draft);
    Ok(outcome)
}

/// Monitor the deployment, collect its logs and archive them. Never fails.
fn after_push(
    pair: &RemotePair,
    wc: &WorkingCopy,
    draft: &mut RunDraft,
    collab: &Collaborators,
    cancel: &CancelToken,
    deployed: &CommitHash,
    pushed_at: DateTime<Utc>,
) {
    let Some(api) = collab.hosted_api.as_deref() else {
        tracing::info!(
            "'{}' has no hosted_api; deployment of {} not monitored",
            pair.name,
            deployed.short()
        );
        return;
    };

    let status = monitor(
        api,
        deployed,
        pair.monitor.timeout(),
        pair.monitor.poll_interval(),
        cancel,
    );
    tracing::info!("deployment of {}: {}", deployed.short(), status.state);
    draft.deployment = Some(status);

    if cancel.is_cancelled() {
        tracing::warn!("run cancelled; skipping log collection");
        return;
    }

    let since = pushed_at - chrono::Duration::seconds(LOG_WINDOW_SLACK_SECS);
    let mut stream = collect_logs(api, since);
    let entries: Vec<_> = stream.by_ref().collect();
    draft.log_fetch_degraded = stream.is_degraded();
    tracing::info!("collected {} log entries", entries.len());

    if pair.logs.archive && !entries.is_empty() {
        match archive_logs(wc, &pair.source, &pair.logs, &entries, Utc::now()) {
            Ok(files) => draft.archived_files = files,
            Err(e) => {
                tracing::warn!("log archive for '{}' failed: {e}", pair.name);
                draft.archive_degraded = true;
            }
        }
    }
    draft.logs = entries;
}

/// Snapshots after acting. Failures only leave the slot empty.
fn read_after(pair: &RemotePair, wc: &WorkingCopy, draft: &mut RunDraft) {
    for (role, remote) in [
        (RemoteRole::Source, &pair.source),
        (RemoteRole::Hosted, &pair.hosted),
    ] {
        let snap = match read_snapshot(wc, role, remote) {
            Ok(snap) => Some(snap),
            Err(e) => {
                tracing::warn!("could not read {role} snapshot after run: {e}");
                None
            }
        };
        match role {
            RemoteRole::Source => draft.after.source = snap,
            RemoteRole::Hosted => draft.after.hosted = snap,
        }
    }
}
