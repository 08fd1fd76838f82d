//! Integration tests for configuration loading and store path resolution
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate REEL_STORE_PATH or REEL_CONFIG are marked with #[serial]
//! to ensure they run sequentially, not in parallel.

use reel_common::config::{
    default_store_path, load_toml_config, resolve_store_path, write_toml_config,
    ClassifierConfig, LoggingConfig, TomlConfig, CONFIG_PATH_ENV, STORE_PATH_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn sample_config() -> TomlConfig {
    TomlConfig {
        store_path: Some(PathBuf::from("/srv/reel/store")),
        classification_workers: 3,
        classification_queue_capacity: 8,
        error_channel_capacity: 32,
        prune_missing: false,
        classifier: ClassifierConfig {
            command: vec!["classify-media".to_string(), "--json".to_string()],
            timeout_secs: 30,
            log_dir: Some(PathBuf::from("/tmp/reel-logs")),
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}

#[test]
fn test_missing_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = load_toml_config(&temp_dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_write_then_load_preserves_fields() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("nested").join("config.toml");

    let config = sample_config();
    write_toml_config(&config, &target).unwrap();

    assert!(target.exists());
    assert!(!temp_dir.path().join("nested").join("config.toml.tmp").exists());

    let loaded = load_toml_config(&target).unwrap();
    assert_eq!(loaded, config);
}

#[cfg(unix)]
#[test]
fn test_written_config_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("config.toml");
    write_toml_config(&sample_config(), &target).unwrap();

    let mode = std::fs::metadata(&target).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn test_invalid_toml_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("config.toml");
    std::fs::write(&target, "classification_workers = \"many\"").unwrap();

    assert!(load_toml_config(&target).is_err());
}

#[test]
fn test_zero_workers_rejected_on_load() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("config.toml");
    std::fs::write(&target, "classification_workers = 0").unwrap();

    assert!(load_toml_config(&target).is_err());
}

#[test]
#[serial]
fn test_cli_argument_wins() {
    env::set_var(STORE_PATH_ENV, "/tmp/reel-env-store");
    let resolved = resolve_store_path(Some(Path::new("/tmp/reel-cli-store")), &sample_config());
    env::remove_var(STORE_PATH_ENV);

    assert_eq!(resolved, PathBuf::from("/tmp/reel-cli-store"));
}

#[test]
#[serial]
fn test_env_beats_toml() {
    env::set_var(STORE_PATH_ENV, "/tmp/reel-env-store");
    let resolved = resolve_store_path(None, &sample_config());
    env::remove_var(STORE_PATH_ENV);

    assert_eq!(resolved, PathBuf::from("/tmp/reel-env-store"));
}

#[test]
#[serial]
fn test_toml_beats_default() {
    env::remove_var(STORE_PATH_ENV);
    let resolved = resolve_store_path(None, &sample_config());
    assert_eq!(resolved, PathBuf::from("/srv/reel/store"));
}

#[test]
#[serial]
fn test_falls_back_to_compiled_default() {
    env::remove_var(STORE_PATH_ENV);
    let resolved = resolve_store_path(None, &TomlConfig::default());
    assert_eq!(resolved, default_store_path());
    assert!(resolved.ends_with("reel/store"));
}

#[test]
#[serial]
fn test_config_env_override() {
    env::set_var(CONFIG_PATH_ENV, "/tmp/reel-custom.toml");
    let path = reel_common::config::default_config_path();
    env::remove_var(CONFIG_PATH_ENV);

    assert_eq!(path, PathBuf::from("/tmp/reel-custom.toml"));
}
