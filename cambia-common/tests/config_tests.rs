//! Configuration resolution tests
//!
//! Tests touching CAMBIA_SERVER or CAMBIA_CONFIG are marked #[serial] so
//! they never race on the process environment.

use cambia_common::config::{
    load_toml_config, write_toml_config, ConfigResolver, LoggingConfig, TomlConfig,
    CONFIG_ENV_VAR, SERVER_ENV_VAR,
};
use cambia_common::Error;
use serial_test::serial;
use std::env;
use tempfile::TempDir;

fn clear_env() {
    env::remove_var(SERVER_ENV_VAR);
    env::remove_var(CONFIG_ENV_VAR);
}

fn write_config(dir: &TempDir, server_url: Option<&str>, level: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    let config = TomlConfig {
        server_url: server_url.map(str::to_string),
        logging: LoggingConfig {
            level: level.to_string(),
        },
        event_capacity: None,
    };
    write_toml_config(&config, &path).unwrap();
    path
}

#[test]
#[serial]
fn test_defaults_when_nothing_configured() {
    clear_env();
    let dir = TempDir::new().unwrap();

    let config = ConfigResolver::new()
        .with_config_path(Some(dir.path().join("missing.toml")))
        .resolve()
        .unwrap();

    assert_eq!(config.server_url, "http://127.0.0.1:3030");
    assert_eq!(config.log_level, "info");
    assert_eq!(config.event_capacity, 1000);
}

#[test]
#[serial]
fn test_toml_supplies_server_and_level() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, Some("https://logs.example.org"), "debug");

    let config = ConfigResolver::new()
        .with_config_path(Some(path))
        .resolve()
        .unwrap();

    assert_eq!(config.server_url, "https://logs.example.org");
    assert_eq!(config.log_level, "debug");
}

#[test]
#[serial]
fn test_env_overrides_toml() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, Some("https://logs.example.org"), "info");
    env::set_var(SERVER_ENV_VAR, "http://10.0.0.5:3031");

    let config = ConfigResolver::new()
        .with_config_path(Some(path))
        .resolve()
        .unwrap();
    clear_env();

    assert_eq!(config.server_url, "http://10.0.0.5:3031");
}

#[test]
#[serial]
fn test_cli_overrides_env_and_toml() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, Some("https://logs.example.org"), "warn");
    env::set_var(SERVER_ENV_VAR, "http://10.0.0.5:3031");

    let config = ConfigResolver::new()
        .with_server_url(Some("http://localhost:9000".to_string()))
        .with_log_level(Some("trace".to_string()))
        .with_config_path(Some(path))
        .resolve()
        .unwrap();
    clear_env();

    assert_eq!(config.server_url, "http://localhost:9000");
    assert_eq!(config.log_level, "trace");
}

#[test]
#[serial]
fn test_blank_overrides_are_ignored() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, Some("https://logs.example.org"), "info");
    env::set_var(SERVER_ENV_VAR, "   ");

    let config = ConfigResolver::new()
        .with_server_url(Some(String::new()))
        .with_config_path(Some(path))
        .resolve()
        .unwrap();
    clear_env();

    assert_eq!(config.server_url, "https://logs.example.org");
}

#[test]
#[serial]
fn test_config_path_from_env() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, Some("http://from-env-file:3030"), "info");
    env::set_var(CONFIG_ENV_VAR, &path);

    let resolver = ConfigResolver::new();
    assert_eq!(resolver.config_path(), Some(path.clone()));
    let config = resolver.resolve().unwrap();
    clear_env();

    assert_eq!(config.server_url, "http://from-env-file:3030");
}

#[test]
#[serial]
fn test_invalid_toml_is_an_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "server_url = [not valid").unwrap();

    let result = ConfigResolver::new().with_config_path(Some(path)).resolve();
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_zero_event_capacity_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "event_capacity = 0\n").unwrap();

    let result = ConfigResolver::new().with_config_path(Some(path)).resolve();
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_write_then_load_creates_parent_dirs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("cambia").join("config.toml");
    let config = TomlConfig {
        server_url: Some("http://127.0.0.1:3031".to_string()),
        logging: LoggingConfig::default(),
        event_capacity: Some(64),
    };

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(&path).unwrap();

    assert_eq!(loaded.server_url.as_deref(), Some("http://127.0.0.1:3031"));
    assert_eq!(loaded.logging.level, "info");
    assert_eq!(loaded.event_capacity, Some(64));
}
