//! twinsync core library: remote-pair registry, run domain types, errors.
//!
//! - [`types`]: pair configuration (remotes, monitor, logs, notify, schedule)
//! - [`run`]: snapshots, decisions, deployment status, the `SyncRun` record
//! - [`error`]: [`ConfigError`]
//! - [`registry`]: load / save / init / list of pair files

pub mod error;
pub mod registry;
pub mod run;
pub mod types;

pub use error::ConfigError;
pub use run::{
    CommitHash, DeploymentState, DeploymentStatus, FatalKind, LogEntry, LogSource,
    RemoteRole, RemoteSnapshot, RunDraft, RunId, RunOutcome, SnapshotPair, SyncDecision,
    SyncRun, Trigger, TriggerKind,
};
pub use types::{
    HostedApiSpec, LockSettings, LogSettings, MergeSettings, MonitorSettings, NotifySettings,
    PairName, RemotePair, RemoteSpec, ScheduleSettings,
};
