//! Registry error-message, atomic-write-safety, and init integration tests.
//! Storage: ~/.twinsync/pairs/<pair>.yaml

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use std::fs;
use twinsync_core::{
    registry::{self, InitRequest},
    ConfigError, HostedApiSpec, NotifySettings, PairName, RemoteSpec,
};

fn name() -> PairName {
    PairName::from("eew")
}

fn request(name: &str) -> InitRequest {
    InitRequest {
        name: PairName::from(name),
        source: RemoteSpec::new("https://github.com/acme/eew.git", "main"),
        hosted: RemoteSpec::new("https://huggingface.co/spaces/acme/eew", "main"),
        hosted_api: Some(HostedApiSpec {
            base_url: "https://huggingface.co".to_string(),
            space_id: "acme/eew".to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_pair_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = registry::load_pair_at(home.path(), &name()).unwrap_err();
    assert!(matches!(err, ConfigError::PairNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("pair config not found"));
    assert!(err.to_string().contains("eew.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".twinsync").join("pairs");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("eew.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = registry::load_pair_at(home.path(), &name()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("eew.yaml"), "must contain file path, got: {err}");
}

#[test]
fn load_pair_missing_hosted_remote_is_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".twinsync/pairs/eew.yaml")
        .write_str(
            "name: eew\nsource:\n  url: https://github.com/acme/eew.git\n\
             created_at: 2026-01-01T00:00:00Z\nupdated_at: 2026-01-01T00:00:00Z\n",
        )
        .expect("write");

    let err = registry::load_pair_at(home.path(), &name()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn load_pair_that_fails_validation_is_invalid() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".twinsync/pairs/eew.yaml")
        .write_str(
            "name: eew\n\
             source:\n  url: https://github.com/acme/eew.git\n\
             hosted:\n  url: https://huggingface.co/spaces/acme/eew\n\
             notify:\n  kind: webhook\n  url: https://relay.example/send\n  recipient: ''\n\
             created_at: 2026-01-01T00:00:00Z\nupdated_at: 2026-01-01T00:00:00Z\n",
        )
        .expect("write");

    let err = registry::load_pair_at(home.path(), &name()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidPair { .. }), "got: {err}");
    assert!(err.to_string().contains("recipient"));
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_cleans_up_tmp_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    registry::init_at(home.path(), request("eew")).expect("init");

    let yaml_path = registry::pair_path_at(home.path(), &name());
    let tmp = yaml_path.with_file_name("eew.yaml.tmp");
    assert!(!tmp.exists(), ".tmp must be removed after successful save");
}

#[test]
fn orphaned_tmp_file_is_not_listed() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    registry::init_at(home.path(), request("eew")).expect("init");

    let yaml_path = registry::pair_path_at(home.path(), &name());
    let original_bytes = fs::read(&yaml_path).expect("read original");

    // Crash after the .tmp write but before rename.
    let tmp = yaml_path.with_file_name("eew.yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    assert_eq!(original_bytes, fs::read(&yaml_path).expect("read after crash"));
    let list = registry::list_pairs_at(home.path()).expect("list");
    assert_eq!(list.len(), 1);
}

// ---------------------------------------------------------------------------
// 3. Init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_pair_yaml_with_0600() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let pair = registry::init_at(home.path(), request("eew")).expect("init");

    home.child(".twinsync/pairs/eew.yaml")
        .assert(predicate::path::exists());
    assert_eq!(pair.notify, NotifySettings::None);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = registry::pair_path_at(home.path(), &name());
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "expected 0600, got {mode:o}");
    }
}

#[test]
fn init_rejects_same_remote_twice() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut req = request("eew");
    req.hosted = req.source.clone();
    let err = registry::init_at(home.path(), req).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidPair { .. }), "got: {err}");
    home.child(".twinsync/pairs/eew.yaml")
        .assert(predicate::path::missing());
}

// ---------------------------------------------------------------------------
// 4. List
// ---------------------------------------------------------------------------

#[test]
fn list_is_sorted_and_deterministic() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    registry::init_at(home.path(), request("zeta")).expect("zeta");
    registry::init_at(home.path(), request("alpha")).expect("alpha");

    let list = registry::list_pairs_at(home.path()).expect("list");
    let names: Vec<_> = list.iter().map(|p| p.name.0.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}

#[test]
fn list_skips_non_yaml_files() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    registry::init_at(home.path(), request("eew")).expect("init");
    home.child(".twinsync/pairs/README.txt")
        .write_str("notes")
        .expect("write");

    assert_eq!(registry::list_pairs_at(home.path()).expect("list").len(), 1);
}
