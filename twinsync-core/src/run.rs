//! Run domain types: snapshots, decisions, deployment status and the
//! [`SyncRun`] record produced by one execution.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::PairName;

// ---------------------------------------------------------------------------
// Remotes and snapshots
// ---------------------------------------------------------------------------

/// Which side of a pair a remote plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteRole {
    Source,
    Hosted,
}

impl fmt::Display for RemoteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteRole::Source => write!(f, "source"),
            RemoteRole::Hosted => write!(f, "hosted"),
        }
    }
}

/// Full hex object id of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitHash(pub String);

impl CommitHash {
    /// First seven characters, as shown in reports.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(7);
        &self.0[..end]
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CommitHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommitHash {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Latest commit of one remote branch, read fresh on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub remote: RemoteRole,
    pub branch: String,
    pub commit: CommitHash,
    /// Committer timestamp of `commit`.
    pub committed_at: DateTime<Utc>,
}

/// Before/after snapshots of both sides of a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SnapshotPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<RemoteSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted: Option<RemoteSnapshot>,
}

/// Direction of travel chosen for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDecision {
    NoOp,
    /// Source is newer: overwrite the hosted branch with the source tip.
    PushForward,
    /// Hosted is newer: merge the hosted branch into the source branch.
    PullBack,
}

impl fmt::Display for SyncDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDecision::NoOp => write!(f, "no-op"),
            SyncDecision::PushForward => write!(f, "push-forward"),
            SyncDecision::PullBack => write!(f, "pull-back"),
        }
    }
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    #[default]
    Pending,
    Building,
    Running,
    Failed,
    Unknown,
}

impl DeploymentState {
    /// `Running`, `Failed` and `Unknown` end the monitor for this run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentState::Running | DeploymentState::Failed | DeploymentState::Unknown
        )
    }

    /// Position along `Pending → Building → (Running | Failed)`.
    pub fn progress(self) -> u8 {
        match self {
            DeploymentState::Pending | DeploymentState::Unknown => 0,
            DeploymentState::Building => 1,
            DeploymentState::Running | DeploymentState::Failed => 2,
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentState::Pending => write!(f, "pending"),
            DeploymentState::Building => write!(f, "building"),
            DeploymentState::Running => write!(f, "running"),
            DeploymentState::Failed => write!(f, "failed"),
            DeploymentState::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub state: DeploymentState,
    /// Free text reported by the hosted platform (or by the monitor itself).
    pub excerpt: String,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub polls: u32,
}

impl DeploymentStatus {
    /// Status right after a push-forward, before the first poll.
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            state: DeploymentState::Pending,
            excerpt: String::new(),
            observed_at: now,
            polls: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// The source remote received a commit on the tracked branch.
    Push,
    Schedule,
    Manual,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Push => write!(f, "push"),
            TriggerKind::Schedule => write!(f, "schedule"),
            TriggerKind::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub branch: String,
    /// New commit announced by an `onPush` trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitHash>,
}

impl Trigger {
    pub fn manual(branch: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Manual,
            branch: branch.into(),
            commit: None,
        }
    }

    pub fn schedule(branch: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Schedule,
            branch: branch.into(),
            commit: None,
        }
    }

    pub fn push(branch: impl Into<String>, commit: CommitHash) -> Self {
        Self {
            kind: TriggerKind::Push,
            branch: branch.into(),
            commit: Some(commit),
        }
    }
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Build,
    Runtime,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Build => write!(f, "build"),
            LogSource::Runtime => write!(f, "runtime"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub source: LogSource,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Outcome and run record
// ---------------------------------------------------------------------------

/// Fatal failures of steps 4.1–4.4; each aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    RemoteUnreachable,
    BranchNotFound,
    PropagationFailure,
    AuthFailure,
    RemoteRejected,
    /// Local failure (working copy, git binary missing, …).
    Internal,
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalKind::RemoteUnreachable => write!(f, "RemoteUnreachable"),
            FatalKind::BranchNotFound => write!(f, "BranchNotFound"),
            FatalKind::PropagationFailure => write!(f, "PropagationFailure"),
            FatalKind::AuthFailure => write!(f, "AuthFailure"),
            FatalKind::RemoteRejected => write!(f, "RemoteRejected"),
            FatalKind::Internal => write!(f, "Internal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    NoOp,
    Pushed { hosted_tip: CommitHash },
    Merged { source_tip: CommitHash },
    ConflictAborted { paths: Vec<String> },
    Aborted { fatal: FatalKind, message: String },
    /// A push-forward was due but nothing would reach the hosted remote
    /// except archived deployment logs.
    Skipped { reason: String },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::NoOp => "no-op",
            RunOutcome::Pushed { .. } => "pushed",
            RunOutcome::Merged { .. } => "merged",
            RunOutcome::ConflictAborted { .. } => "conflict-aborted",
            RunOutcome::Aborted { .. } => "aborted",
            RunOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// Identifier of one run: `<UTC stamp>-<trigger>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(started_at: DateTime<Utc>, kind: TriggerKind) -> Self {
        Self(format!("{}-{kind}", started_at.format("%Y%m%dT%H%M%SZ")))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Finalized record of one execution. Built through [`RunDraft`]; never
/// modified after [`RunDraft::finalize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: RunId,
    pub pair: PairName,
    pub trigger: Trigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<SyncDecision>,
    pub before: SnapshotPair,
    pub after: SnapshotPair,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentStatus>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    /// Repository-relative paths of archived log files.
    #[serde(default)]
    pub archived_files: Vec<String>,
    #[serde(default)]
    pub log_fetch_degraded: bool,
    #[serde(default)]
    pub archive_degraded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncRun {
    /// Start a run. The returned draft is the only mutable form of the record.
    pub fn start(pair: PairName, trigger: Trigger, started_at: DateTime<Utc>) -> RunDraft {
        RunDraft {
            id: RunId::new(started_at, trigger.kind),
            pair,
            trigger,
            decision: None,
            before: SnapshotPair::default(),
            after: SnapshotPair::default(),
            deployment: None,
            logs: Vec::new(),
            archived_files: Vec::new(),
            log_fetch_degraded: false,
            archive_degraded: false,
            started_at,
        }
    }

    /// Conflicts and failed propagation need a human.
    pub fn requires_manual_resolution(&self) -> bool {
        matches!(
            self.outcome,
            RunOutcome::ConflictAborted { .. }
                | RunOutcome::Aborted {
                    fatal: FatalKind::PropagationFailure,
                    ..
                }
        )
    }

    /// Completed, but with a non-fatal failure recorded along the way.
    pub fn is_degraded(&self) -> bool {
        self.log_fetch_degraded
            || self.archive_degraded
            || self
                .deployment
                .as_ref()
                .is_some_and(|d| d.state == DeploymentState::Unknown)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.outcome,
            RunOutcome::Aborted { .. } | RunOutcome::ConflictAborted { .. }
        )
    }

    /// One-word verdict used in report subjects and the status table.
    pub fn verdict(&self) -> &'static str {
        if self.requires_manual_resolution() {
            "ACTION REQUIRED"
        } else if self.is_fatal() {
            "FAILED"
        } else if matches!(
            self.deployment.as_ref().map(|d| d.state),
            Some(DeploymentState::Failed)
        ) {
            "DEPLOY FAILED"
        } else if self.is_degraded() {
            "DEGRADED"
        } else {
            "OK"
        }
    }
}

/// In-progress run owned by the executing pipeline.
#[derive(Debug, Clone)]
pub struct RunDraft {
    pub id: RunId,
    pub pair: PairName,
    pub trigger: Trigger,
    pub decision: Option<SyncDecision>,
    pub before: SnapshotPair,
    pub after: SnapshotPair,
    pub deployment: Option<DeploymentStatus>,
    pub logs: Vec<LogEntry>,
    pub archived_files: Vec<String>,
    pub log_fetch_degraded: bool,
    pub archive_degraded: bool,
    pub started_at: DateTime<Utc>,
}

impl RunDraft {
    pub fn finalize(self, outcome: RunOutcome, finished_at: DateTime<Utc>) -> SyncRun {
        SyncRun {
            id: self.id,
            pair: self.pair,
            trigger: self.trigger,
            decision: self.decision,
            before: self.before,
            after: self.after,
            outcome,
            deployment: self.deployment,
            logs: self.logs,
            archived_files: self.archived_files,
            log_fetch_degraded: self.log_fetch_degraded,
            archive_degraded: self.archive_degraded,
            started_at: self.started_at,
            finished_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
