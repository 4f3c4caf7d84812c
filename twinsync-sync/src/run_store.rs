//! Run store: the last finalized run per pair.
//!
//! Persists the `SyncRun` JSON at `<home>/.twinsync/runs/<pair>.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the registry.

use std::path::{Path, PathBuf};

use twinsync_core::{PairName, SyncRun};

use crate::error::{io_err, SyncError};

/// `~/.twinsync/runs/<pair>.json`
pub fn run_path_at(home: &Path, pair: &PairName) -> PathBuf {
    home.join(".twinsync")
        .join("runs")
        .join(format!("{}.json", pair.0))
}

/// Last run of `pair`, or `None` if it never ran.
pub fn load_last_at(home: &Path, pair: &PairName) -> Result<Option<SyncRun>, SyncError> {
    let path = run_path_at(home, pair);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Replace the last-run marker of `run.pair` atomically.
pub fn save_last_at(home: &Path, run: &SyncRun) -> Result<PathBuf, SyncError> {
    let path = run_path_at(home, &run.pair);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid run store path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(run)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}
