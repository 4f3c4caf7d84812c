//! Error types for twinsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use twinsync_core::{ConfigError, FatalKind, RemoteRole};
use twinsync_renderer::RenderError;

use crate::git::GitError;
use crate::run_lock::RunLockError;

/// All errors that can arise from sync operations.
///
/// The first five variants form the fatal taxonomy of a run; they map onto
/// [`FatalKind`] through [`SyncError::fatal_kind`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{remote} remote unreachable: {detail}")]
    RemoteUnreachable { remote: RemoteRole, detail: String },

    #[error("branch '{branch}' not found on {remote} remote")]
    BranchNotFound { remote: RemoteRole, branch: String },

    /// Merge succeeded locally but could not be pushed to the source remote.
    #[error("merged result could not be pushed to the source remote: {detail}")]
    PropagationFailure { detail: String },

    #[error("{remote} remote rejected the credentials: {detail}")]
    AuthFailure { remote: RemoteRole, detail: String },

    #[error("{remote} remote rejected the push: {detail}")]
    RemoteRejected { remote: RemoteRole, detail: String },

    /// Git refused to start the merge (e.g. unrelated histories).
    #[error("merge refused: {detail}")]
    MergeRefused { detail: String },

    /// A git invocation in the private working copy failed.
    #[error("git error: {0}")]
    Git(#[from] GitError),

    /// An error from the pair registry.
    #[error("registry error: {0}")]
    Config(#[from] ConfigError),

    /// An error from the rendering engine.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("run lock error: {0}")]
    Lock(#[from] RunLockError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (run store).
    #[error("run store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Classification recorded in an aborted run.
    pub fn fatal_kind(&self) -> FatalKind {
        match self {
            SyncError::RemoteUnreachable { .. } => FatalKind::RemoteUnreachable,
            SyncError::BranchNotFound { .. } => FatalKind::BranchNotFound,
            SyncError::PropagationFailure { .. } => FatalKind::PropagationFailure,
            SyncError::AuthFailure { .. } => FatalKind::AuthFailure,
            SyncError::RemoteRejected { .. } => FatalKind::RemoteRejected,
            _ => FatalKind::Internal,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
