//! Report context: serializable rendering payload built from a [`SyncRun`].
//!
//! Every field is derived from the run record alone (no clock reads), so the
//! same run always renders the same report.

use serde::{Deserialize, Serialize};

use twinsync_core::{DeploymentState, RemoteSnapshot, RunOutcome, SyncRun};

use crate::error::RenderError;

/// Flat + structured rendering payload for the subject and body templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportContext {
    pub pair: String,
    pub run_id: String,
    /// `OK`, `DEGRADED`, `DEPLOY FAILED`, `FAILED` or `ACTION REQUIRED`.
    pub verdict: String,
    pub trigger: TriggerCtx,
    /// `no-op`, `push-forward`, `pull-back`, or `undecided` when the run
    /// aborted before both snapshots were read.
    pub decision: String,
    pub outcome: OutcomeCtx,
    pub snapshots: Vec<SnapshotCtx>,
    pub deployment: Option<DeploymentCtx>,
    /// Most recent entries, oldest first.
    pub log_excerpt: Vec<LogLineCtx>,
    pub log_total: usize,
    pub archived_files: Vec<String>,
    pub requires_manual_resolution: bool,
    pub degraded: bool,
    pub log_fetch_degraded: bool,
    pub archive_degraded: bool,
    pub deployment_unknown: bool,
    pub started_at: String,
    pub finished_at: String,
    pub duration_secs: i64,
    pub meta: MetaCtx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerCtx {
    pub kind: String,
    pub branch: String,
    pub commit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeCtx {
    pub label: String,
    pub detail: String,
    /// Conflicting paths of a `conflict-aborted` merge.
    pub paths: Vec<String>,
    /// Fatal kind of an `aborted` run.
    pub fatal: Option<String>,
}

/// One row of the before/after table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCtx {
    /// `before` or `after`.
    pub phase: String,
    pub remote: String,
    pub branch: String,
    pub commit: String,
    pub commit_short: String,
    pub committed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentCtx {
    pub state: String,
    pub excerpt: String,
    pub observed_at: String,
    pub polls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLineCtx {
    pub source: String,
    pub timestamp: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCtx {
    pub twinsync_version: String,
}

impl ReportContext {
    /// Build a [`ReportContext`] from a finalized run, quoting at most
    /// `excerpt_entries` of its most recent log entries.
    pub fn from_run(run: &SyncRun, excerpt_entries: usize) -> Self {
        let outcome = outcome_ctx(&run.outcome);

        let mut snapshots = Vec::new();
        for (phase, pair) in [("before", &run.before), ("after", &run.after)] {
            for snap in [&pair.source, &pair.hosted].into_iter().flatten() {
                snapshots.push(snapshot_ctx(phase, snap));
            }
        }

        let skip = run.logs.len().saturating_sub(excerpt_entries);
        let log_excerpt = run
            .logs
            .iter()
            .skip(skip)
            .map(|e| LogLineCtx {
                source: e.source.to_string(),
                timestamp: e.timestamp.to_rfc3339(),
                text: e.text.clone(),
            })
            .collect();

        ReportContext {
            pair: run.pair.0.clone(),
            run_id: run.id.0.clone(),
            verdict: run.verdict().to_string(),
            trigger: TriggerCtx {
                kind: run.trigger.kind.to_string(),
                branch: run.trigger.branch.clone(),
                commit: run.trigger.commit.as_ref().map(|c| c.0.clone()),
            },
            decision: run
                .decision
                .map(|d| d.to_string())
                .unwrap_or_else(|| "undecided".to_string()),
            outcome,
            snapshots,
            deployment: run.deployment.as_ref().map(|d| DeploymentCtx {
                state: d.state.to_string(),
                excerpt: d.excerpt.clone(),
                observed_at: d.observed_at.to_rfc3339(),
                polls: d.polls,
            }),
            log_excerpt,
            log_total: run.logs.len(),
            archived_files: run.archived_files.clone(),
            requires_manual_resolution: run.requires_manual_resolution(),
            degraded: run.is_degraded(),
            log_fetch_degraded: run.log_fetch_degraded,
            archive_degraded: run.archive_degraded,
            deployment_unknown: run
                .deployment
                .as_ref()
                .is_some_and(|d| d.state == DeploymentState::Unknown),
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.to_rfc3339(),
            duration_secs: (run.finished_at - run.started_at).num_seconds(),
            meta: MetaCtx {
                twinsync_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

fn outcome_ctx(outcome: &RunOutcome) -> OutcomeCtx {
    let (detail, paths, fatal) = match outcome {
        RunOutcome::NoOp => ("remotes already in sync".to_string(), vec![], None),
        RunOutcome::Pushed { hosted_tip } => (
            format!("hosted branch force-updated to {}", hosted_tip.short()),
            vec![],
            None,
        ),
        RunOutcome::Merged { source_tip } => (
            format!("hosted edits merged; source branch now at {}", source_tip.short()),
            vec![],
            None,
        ),
        RunOutcome::ConflictAborted { paths } => (
            format!("merge conflict in {} path(s); merge aborted", paths.len()),
            paths.clone(),
            None,
        ),
        RunOutcome::Aborted { fatal, message } => {
            (message.clone(), vec![], Some(fatal.to_string()))
        }
        RunOutcome::Skipped { reason } => (reason.clone(), vec![], None),
    };
    OutcomeCtx {
        label: outcome.label().to_string(),
        detail,
        paths,
        fatal,
    }
}

fn snapshot_ctx(phase: &str, snap: &RemoteSnapshot) -> SnapshotCtx {
    SnapshotCtx {
        phase: phase.to_string(),
        remote: snap.remote.to_string(),
        branch: snap.branch.clone(),
        commit: snap.commit.0.clone(),
        commit_short: snap.commit.short().to_string(),
        committed_at: snap.committed_at.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use twinsync_core::{
        CommitHash, FatalKind, LogEntry, LogSource, PairName, RemoteRole, Trigger,
    };

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("ts")
    }

    fn run_with_logs(n: usize) -> SyncRun {
        let mut draft = SyncRun::start(PairName::from("eew"), Trigger::manual("main"), at(100));
        draft.before.source = Some(RemoteSnapshot {
            remote: RemoteRole::Source,
            branch: "main".to_string(),
            commit: CommitHash::from("aaaaaaaaaaaa"),
            committed_at: at(90),
        });
        for i in 0..n {
            draft.logs.push(LogEntry {
                source: LogSource::Build,
                timestamp: at(100 + i as i64),
                text: format!("line {i}"),
            });
        }
        draft.finalize(RunOutcome::NoOp, at(130))
    }

    #[test]
    fn excerpt_keeps_most_recent_entries() {
        let ctx = ReportContext::from_run(&run_with_logs(30), 5);
        assert_eq!(ctx.log_total, 30);
        let texts: Vec<_> = ctx.log_excerpt.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["line 25", "line 26", "line 27", "line 28", "line 29"]);
    }

    #[test]
    fn undecided_when_run_aborted_early() {
        let run = SyncRun::start(PairName::from("eew"), Trigger::manual("main"), at(1)).finalize(
            RunOutcome::Aborted {
                fatal: FatalKind::BranchNotFound,
                message: "branch 'main' not found".to_string(),
            },
            at(2),
        );
        let ctx = ReportContext::from_run(&run, 10);
        assert_eq!(ctx.decision, "undecided");
        assert_eq!(ctx.outcome.fatal.as_deref(), Some("BranchNotFound"));
        assert_eq!(ctx.verdict, "FAILED");
    }

    #[test]
    fn snapshots_flattened_with_phase() {
        let ctx = ReportContext::from_run(&run_with_logs(0), 10);
        assert_eq!(ctx.snapshots.len(), 1);
        assert_eq!(ctx.snapshots[0].phase, "before");
        assert_eq!(ctx.snapshots[0].commit_short, "aaaaaaa");
        assert_eq!(ctx.duration_secs, 30);
    }

    #[test]
    fn to_tera_context_succeeds() {
        let ctx = ReportContext::from_run(&run_with_logs(2), 10);
        ctx.to_tera_context().expect("context conversion");
    }
}
