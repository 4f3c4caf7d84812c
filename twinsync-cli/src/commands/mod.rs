pub mod daemon;
pub mod init;
pub mod pair;
pub mod plan;
pub mod report;
pub mod run;
pub mod status;
pub mod unlock;

use std::path::PathBuf;

use anyhow::{Context, Result};
use twinsync_core::{registry, PairName, RemotePair};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn load_pair(home: &std::path::Path, name: &str) -> Result<RemotePair> {
    registry::load_pair_at(home, &PairName::from(name))
        .with_context(|| format!("failed to load pair '{name}'; run `twinsync init` first"))
}
