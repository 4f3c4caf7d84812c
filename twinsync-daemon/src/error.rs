use std::path::PathBuf;

use thiserror::Error;

/// Everything the daemon runtime and its socket clients can fail with.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("registry error: {0}")]
    Config(#[from] twinsync_core::ConfigError),

    #[error("sync error: {0}")]
    Sync(#[from] twinsync_sync::SyncError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("unknown pair '{0}'")]
    UnknownPair(String),

    /// A background task panicked or was aborted.
    #[error("{task} task failed: {reason}")]
    TaskFailed { task: &'static str, reason: String },

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
