//! Per-pair YAML registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.twinsync/
//!   pairs/
//!     <pair_name>.yaml   (one file per remote pair: mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every filesystem function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::ConfigError;
use crate::types::{HostedApiSpec, PairName, RemotePair, RemoteSpec};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.twinsync/`: pure, no I/O.
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".twinsync")
}

/// `<home>/.twinsync/pairs/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn pairs_dir_at(home: &Path) -> Result<PathBuf, ConfigError> {
    let dir = root_at(home).join("pairs");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.twinsync/pairs/<pair>.yaml`: pure, no I/O.
pub fn pair_path_at(home: &Path, pair: &PairName) -> PathBuf {
    root_at(home).join("pairs").join(format!("{}.yaml", pair.0))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load a single pair from `<home>/.twinsync/pairs/<pair>.yaml`.
///
/// Returns `ConfigError::PairNotFound` if absent, `ConfigError::Parse`
/// (with path + line context) if malformed YAML, and
/// `ConfigError::InvalidPair` if the file parses but fails validation.
pub fn load_pair_at(home: &Path, pair: &PairName) -> Result<RemotePair, ConfigError> {
    let path = pair_path_at(home, pair);
    if !path.exists() {
        return Err(ConfigError::PairNotFound { path });
    }
    let loaded = read_pair_file(&path)?;
    loaded.validate()?;
    Ok(loaded)
}

/// `load_pair_at` convenience wrapper.
pub fn load_pair(pair: &PairName) -> Result<RemotePair, ConfigError> {
    load_pair_at(&home()?, pair)
}

/// All pairs under `<home>/.twinsync/pairs/`, sorted by name.
///
/// Non-YAML files (including `.yaml.tmp` leftovers) are skipped.
pub fn list_pairs_at(home: &Path) -> Result<Vec<RemotePair>, ConfigError> {
    let dir = root_at(home).join("pairs");
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut pairs = Vec::new();
    for entry in entries {
        let fname = entry.file_name();
        if !fname.to_string_lossy().ends_with(".yaml") {
            continue;
        }
        pairs.push(read_pair_file(&entry.path())?);
    }
    pairs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(pairs)
}

/// `list_pairs_at` convenience wrapper.
pub fn list_pairs() -> Result<Vec<RemotePair>, ConfigError> {
    list_pairs_at(&home()?)
}

fn read_pair_file(path: &Path) -> Result<RemotePair, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save a pair to `<home>/.twinsync/pairs/<pair>.yaml`.
///
/// Write flow: validate → serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
/// The file may hold a literal token, hence the restrictive mode.
pub fn save_pair_at(home: &Path, pair: &RemotePair) -> Result<(), ConfigError> {
    pair.validate()?;
    pairs_dir_at(home)?;
    let path = pair_path_at(home, &pair.name);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", pair.name.0));

    let yaml = serde_yaml::to_string(pair)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_pair_at` convenience wrapper.
pub fn save_pair(pair: &RemotePair) -> Result<(), ConfigError> {
    save_pair_at(&home()?, pair)
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Everything `init` needs to register a pair.
#[derive(Debug, Clone)]
pub struct InitRequest {
    pub name: PairName,
    pub source: RemoteSpec,
    pub hosted: RemoteSpec,
    pub hosted_api: Option<HostedApiSpec>,
}

/// Register a new pair.
///
/// Idempotent: if the file already exists, loads and returns it unchanged.
pub fn init_at(home: &Path, request: InitRequest) -> Result<RemotePair, ConfigError> {
    let path = pair_path_at(home, &request.name);
    if path.exists() {
        return load_pair_at(home, &request.name);
    }

    let mut pair = RemotePair::new(request.name, request.source, request.hosted);
    pair.hosted_api = request.hosted_api;
    save_pair_at(home, &pair)?;
    Ok(pair)
}

/// `init_at` convenience wrapper.
pub fn init(request: InitRequest) -> Result<RemotePair, ConfigError> {
    init_at(&home()?, request)
}

/// Load, mutate and save a pair, bumping `updated_at`.
pub fn update_pair_at(
    home: &Path,
    pair: &PairName,
    mutate: impl FnOnce(&mut RemotePair),
) -> Result<RemotePair, ConfigError> {
    let mut loaded = load_pair_at(home, pair)?;
    mutate(&mut loaded);
    loaded.updated_at = Utc::now();
    save_pair_at(home, &loaded)?;
    Ok(loaded)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Home directory of the current user.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
