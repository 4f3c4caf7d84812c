//! Error types for twinsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from pair registry operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse pair config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.twinsync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The pair YAML file did not exist at the expected path.
    #[error("pair config not found at {path}")]
    PairNotFound { path: PathBuf },

    /// The pair config parsed but is not usable.
    #[error("invalid pair config '{pair}': {reason}")]
    InvalidPair { pair: String, reason: String },
}
