//! Run lock: serializes executions against one remote pair.
//!
//! `~/.twinsync/run/<pair key>.lock` carries an exclusive advisory lock for as
//! long as a run holds it, plus JSON metadata about that run. The OS drops the
//! lock when the holder exits, so a file left behind by a crashed run is just
//! reused. The key hashes both normalized remote URLs and branches, so two
//! pair configs naming the same remotes share one lock.

use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use twinsync_core::types::normalize_remote_url;
use twinsync_core::{PairName, RemotePair, TriggerKind};

use crate::cancel::CancelToken;

const RETRY_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLockMeta {
    pub pid: u32,
    pub pair: PairName,
    pub trigger: TriggerKind,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RunLockError {
    #[error("run lock already held at {path:?}{}", describe_holder(.meta))]
    Held {
        path: PathBuf,
        meta: Option<Box<RunLockMeta>>,
    },
    #[error("lock metadata corrupted at {path:?}: {source}")]
    MetadataCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cancelled while waiting for the run lock")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

fn describe_holder(meta: &Option<Box<RunLockMeta>>) -> String {
    match meta {
        Some(m) => format!(
            " (pair '{}', {} run, pid {}, since {})",
            m.pair,
            m.trigger,
            m.pid,
            m.started_at.to_rfc3339()
        ),
        None => String::new(),
    }
}

/// Stable identifier of the remote pair behind a config.
pub fn pair_key(pair: &RemotePair) -> String {
    let mut hasher = Sha256::new();
    for part in [
        normalize_remote_url(&pair.source.url),
        pair.source.branch.clone(),
        normalize_remote_url(&pair.hosted.url),
        pair.hosted.branch.clone(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// `<home>/.twinsync/run/`
pub fn lock_dir_at(home: &Path) -> PathBuf {
    home.join(".twinsync").join("run")
}

/// `<home>/.twinsync/run/<pair key>.lock`
pub fn lock_path_at(home: &Path, pair: &RemotePair) -> PathBuf {
    lock_dir_at(home).join(format!("{}.lock", pair_key(pair)))
}

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
    meta: RunLockMeta,
    released: bool,
}

impl RunLock {
    /// Take the lock now or fail with [`RunLockError::Held`].
    pub fn try_acquire_at(
        home: &Path,
        pair: &RemotePair,
        trigger: TriggerKind,
    ) -> Result<Self, RunLockError> {
        let dir = lock_dir_at(home);
        fs::create_dir_all(&dir)?;
        set_permissions(&dir, 0o700)?;

        let path = lock_path_at(home, pair);
        let file = open_lock_file(&path)?;
        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            return Err(if is_contended(&e) { held(&path) } else { e.into() });
        }
        // A releasing holder unlinks the file before unlocking it, so the
        // inode locked here may no longer be the one at `path`.
        if !still_at(&file, &path)? {
            return Err(held(&path));
        }

        let meta = RunLockMeta {
            pid: std::process::id(),
            pair: pair.name.clone(),
            trigger,
            started_at: Utc::now(),
        };
        write_metadata(&file, &path, &meta)?;
        Ok(RunLock {
            path,
            file,
            meta,
            released: false,
        })
    }

    /// Take the lock, waiting up to `pair.lock.wait_secs` for the current
    /// holder to finish.
    pub fn acquire_at(
        home: &Path,
        pair: &RemotePair,
        trigger: TriggerKind,
        cancel: &CancelToken,
    ) -> Result<Self, RunLockError> {
        let deadline = Instant::now() + Duration::from_secs(pair.lock.wait_secs);
        loop {
            match Self::try_acquire_at(home, pair, trigger) {
                Err(RunLockError::Held { .. }) if Instant::now() < deadline => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if cancel.wait(RETRY_INTERVAL.min(remaining)) {
                        return Err(RunLockError::Cancelled);
                    }
                }
                other => return other,
            }
        }
    }

    pub fn meta(&self) -> &RunLockMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<(), RunLockError> {
        self.released = true;
        let removed = remove_if_exists(&self.path);
        FileExt::unlock(&self.file)?;
        removed.map_err(Into::into)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = remove_if_exists(&self.path);
            let _ = FileExt::unlock(&self.file);
        }
    }
}

/// Metadata of the live holder, if a run holds the pair right now.
pub fn read_lock_at(home: &Path, pair: &RemotePair) -> Result<Option<RunLockMeta>, RunLockError> {
    let path = lock_path_at(home, pair);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match FileExt::try_lock_shared(&file) {
        Ok(()) => {
            FileExt::unlock(&file)?;
            Ok(None)
        }
        Err(e) if is_contended(&e) => read_metadata(&path).map(Some),
        Err(e) => Err(e.into()),
    }
}

/// Remove a lock file left behind by a finished or crashed run. Returns
/// whether one existed; fails with [`RunLockError::Held`] while a live run
/// holds it.
pub fn remove_lock_at(home: &Path, pair: &RemotePair) -> Result<bool, RunLockError> {
    let path = lock_path_at(home, pair);
    let file = match fs::OpenOptions::new().read(true).write(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if let Err(e) = FileExt::try_lock_exclusive(&file) {
        return Err(if is_contended(&e) { held(&path) } else { e.into() });
    }
    let removed = match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    };
    FileExt::unlock(&file)?;
    removed
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn held(path: &Path) -> RunLockError {
    RunLockError::Held {
        path: path.to_path_buf(),
        meta: read_metadata(path).ok().map(Box::new),
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == fs2::lock_contended_error().kind()
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn open_lock_file(path: &Path) -> Result<File, RunLockError> {
    let mut options = fs::OpenOptions::new();
    options.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    Ok(options.open(path)?)
}

#[cfg(unix)]
fn still_at(file: &File, path: &Path) -> Result<bool, RunLockError> {
    use std::os::unix::fs::MetadataExt;
    let locked = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == locked.dev() && current.ino() == locked.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

// Open files cannot be unlinked here, so the path always names the locked file.
#[cfg(not(unix))]
fn still_at(_file: &File, _path: &Path) -> Result<bool, RunLockError> {
    Ok(true)
}

fn write_metadata(file: &File, path: &Path, meta: &RunLockMeta) -> Result<(), RunLockError> {
    let mut writer = file;
    writer.set_len(0)?;
    writer.seek(SeekFrom::Start(0))?;
    serde_json::to_writer(&mut writer, meta).map_err(|source| RunLockError::MetadataCorrupt {
        path: path.to_path_buf(),
        source,
    })?;
    file.sync_all()?;
    Ok(())
}

fn read_metadata(path: &Path) -> Result<RunLockMeta, RunLockError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|source| RunLockError::MetadataCorrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn set_permissions(path: &Path, mode: u32) -> Result<(), RunLockError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}
