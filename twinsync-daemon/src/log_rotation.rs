//! Size-based rotation of the daemon log files.
//!
//! `daemon.log` → `daemon.log.1` → … → `daemon.log.<keep>`; the oldest copy
//! is dropped and a fresh empty live file is created.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::paths::{stderr_log_path, stdout_log_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub keep: usize,
}

/// 10 MiB per file, 5 rotated copies.
pub const DAEMON_POLICY: RotationPolicy = RotationPolicy {
    max_bytes: 10 * 1024 * 1024,
    keep: 5,
};

impl RotationPolicy {
    /// Rotate `live` if it reached `max_bytes`. A missing file is not an error.
    pub fn rotate(&self, live: &Path) -> io::Result<bool> {
        let size = match fs::metadata(live) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        if size < self.max_bytes || self.keep == 0 {
            return Ok(false);
        }

        remove_if_exists(&backup_path(live, self.keep))?;
        for n in (1..self.keep).rev() {
            let from = backup_path(live, n);
            if from.exists() {
                fs::rename(&from, backup_path(live, n + 1))?;
            }
        }
        fs::rename(live, backup_path(live, 1))?;
        fs::File::create(live)?;
        Ok(true)
    }
}

/// Rotate both daemon logs under `home`. Failures are logged, never raised.
pub fn rotate_daemon_logs(home: &Path) -> Vec<PathBuf> {
    let mut rotated = Vec::new();
    for live in [stdout_log_path(home), stderr_log_path(home)] {
        match DAEMON_POLICY.rotate(&live) {
            Ok(true) => {
                tracing::info!(path = %live.display(), "log file rotated");
                rotated.push(live);
            }
            Ok(false) => {}
            Err(err) => tracing::warn!(path = %live.display(), error = %err, "log rotation failed"),
        }
    }
    rotated
}

/// `daemon.log` + `n` → `daemon.log.n`
fn backup_path(live: &Path, n: usize) -> PathBuf {
    let mut name = live.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    live.with_file_name(name)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SMALL: RotationPolicy = RotationPolicy {
        max_bytes: 16,
        keep: 3,
    };

    fn write(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn under_threshold_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("daemon.log");
        write(&live, "short");
        assert!(!SMALL.rotate(&live).unwrap());
        assert!(!backup_path(&live, 1).exists());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(!SMALL.rotate(&dir.path().join("daemon.log")).unwrap());
    }

    #[test]
    fn oversized_file_moves_to_first_backup() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("daemon.log");
        write(&live, "0123456789abcdefXYZ");
        assert!(SMALL.rotate(&live).unwrap());
        assert_eq!(fs::metadata(&live).unwrap().len(), 0);
        assert_eq!(
            fs::read_to_string(backup_path(&live, 1)).unwrap(),
            "0123456789abcdefXYZ"
        );
    }

    #[test]
    fn backups_shift_and_oldest_is_dropped() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("daemon-err.log");
        for round in 1..=4 {
            write(&live, &format!("round-{round}-{}", "x".repeat(16)));
            assert!(SMALL.rotate(&live).unwrap());
        }
        assert!(fs::read_to_string(backup_path(&live, 1)).unwrap().starts_with("round-4"));
        assert!(fs::read_to_string(backup_path(&live, 3)).unwrap().starts_with("round-2"));
        assert!(!backup_path(&live, 4).exists(), "keeps at most 3 copies");
    }

    #[test]
    fn daemon_logs_under_home() {
        let home = TempDir::new().unwrap();
        let logs = crate::paths::logs_dir(home.path());
        fs::create_dir_all(&logs).unwrap();
        write(&stdout_log_path(home.path()), "tiny");
        assert!(rotate_daemon_logs(home.path()).is_empty());
    }
}
