//! Tests for bootstrap configuration resolution
//!
//! Tests that manipulate TCV_ROOT_FOLDER or TCV_CONFIG are marked #[serial]
//! so they never race each other on process environment.

use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tcv_common::config::{
    default_root_folder, ensure_database_path, load_toml_or_default, resolve_config_path,
    LoggingConfig, RootFolderResolver, CONFIG_PATH_ENV, ROOT_FOLDER_ENV,
};

#[derive(Debug, Default, Deserialize)]
struct SampleConfig {
    #[serde(default)]
    root_folder: Option<PathBuf>,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
#[serial]
fn test_resolver_cli_arg_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/tcv-env");
    let resolver = RootFolderResolver::new("test")
        .with_cli_arg(Some(PathBuf::from("/tmp/tcv-cli")))
        .with_toml_root(Some(PathBuf::from("/tmp/tcv-toml")));

    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/tcv-cli"));
    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/tcv-env");
    let resolver =
        RootFolderResolver::new("test").with_toml_root(Some(PathBuf::from("/tmp/tcv-toml")));

    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/tcv-env"));
    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_falls_back_to_default() {
    env::remove_var(ROOT_FOLDER_ENV);
    let resolver = RootFolderResolver::new("test");
    assert_eq!(resolver.resolve(), default_root_folder());
}

#[test]
fn test_missing_config_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config: SampleConfig =
        load_toml_or_default(Some(&dir.path().join("absent.toml"))).unwrap();

    assert!(config.root_folder.is_none());
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_config_file_is_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tcv-engine.toml");
    std::fs::write(
        &path,
        "root_folder = \"/srv/tcv\"\n\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    let config: SampleConfig = load_toml_or_default(Some(&path)).unwrap();
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/tcv")));
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_broken_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "root_folder = [unterminated").unwrap();

    let result: tcv_common::Result<SampleConfig> = load_toml_or_default(Some(&path));
    assert!(matches!(result, Err(tcv_common::Error::Config(_))));
}

#[test]
#[serial]
fn test_config_path_env_override() {
    env::set_var(CONFIG_PATH_ENV, "/tmp/tcv-custom.toml");
    assert_eq!(
        resolve_config_path("tcv-engine", None),
        Some(PathBuf::from("/tmp/tcv-custom.toml"))
    );
    env::remove_var(CONFIG_PATH_ENV);
}

#[test]
fn test_ensure_database_path_creates_folder() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("nested").join("root");
    let db_path = ensure_database_path(&root, "tcv.db").unwrap();

    assert!(root.is_dir());
    assert_eq!(db_path, root.join("tcv.db"));
}
