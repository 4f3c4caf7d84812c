//! # twinsync-sync
//!
//! Keeps a source git remote and a hosted deployment remote in step.
//!
//! Call [`pipeline::run_pair_at`] to execute one run for a registered pair,
//! or [`pipeline::run_at`] with explicit [`pipeline::Collaborators`] (tests,
//! daemon). [`pipeline::plan_at`] reads both remotes and reports the decision
//! without acting.

pub mod archive;
pub mod cancel;
pub mod decision;
pub mod error;
pub mod git;
pub mod hosted;
pub mod logs;
pub mod merge;
pub mod monitor;
pub mod notify;
pub mod pipeline;
pub mod push;
pub mod reporter;
pub mod run_lock;
pub mod run_store;
pub mod snapshot;

pub use cancel::CancelToken;
pub use decision::decide;
pub use error::SyncError;
pub use hosted::{HostedApi, HostedApiError, HttpHostedApi, RuntimeStatus};
pub use notify::{Notification, Notifier, NotifyError};
pub use pipeline::{plan_at, run_at, run_pair_at, Collaborators, Plan, RunResult};
pub use reporter::ReportReceipt;
pub use run_lock::{RunLock, RunLockError, RunLockMeta};
