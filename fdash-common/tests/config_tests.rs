//! Configuration resolution and graceful degradation tests
//!
//! Covers:
//! - Priority order: CLI → ENV → TOML → compiled defaults
//! - Missing or malformed TOML files never abort resolution
//! - Invalid numeric settings fall back to defaults
//!
//! Note: Uses serial_test to prevent ENV variable race conditions.
//! Tests that manipulate FDASH_* variables are marked with #[serial].

use fdash_common::config::{
    write_toml_config, CompiledDefaults, ConfigResolver, LoggingConfig, TomlConfig,
    ENV_API_URL, ENV_CONFIG_FILE, ENV_DATA_FOLDER,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn clear_env() {
    env::remove_var(ENV_API_URL);
    env::remove_var(ENV_DATA_FOLDER);
    env::remove_var(ENV_CONFIG_FILE);
}

#[test]
fn test_compiled_defaults() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.data_folder.as_os_str().is_empty());
    assert_eq!(defaults.poll_interval_ms, 2_000);
    assert_eq!(defaults.request_timeout_ms, 30_000);
    assert_eq!(defaults.max_poll_failures, 5);
    assert_eq!(defaults.log_level, "info");
}

#[test]
#[serial]
fn test_empty_toml_uses_defaults() {
    clear_env();

    let config = ConfigResolver::new().resolve_with(TomlConfig::default());
    let defaults = CompiledDefaults::for_current_platform();

    assert_eq!(config.api_base_url, defaults.api_base_url);
    assert_eq!(config.data_folder, defaults.data_folder);
    assert_eq!(config.poll_interval, Duration::from_secs(2));
    assert_eq!(config.database_path(), defaults.data_folder.join("fdash.db"));
}

#[test]
#[serial]
fn test_toml_overrides_defaults() {
    clear_env();

    let toml_config = TomlConfig {
        api_base_url: Some("https://funds.example.com/api/".to_string()),
        data_folder: Some(PathBuf::from("/tmp/fdash-toml")),
        request_timeout_ms: Some(5_000),
        poll_interval_ms: Some(500),
        max_poll_failures: Some(2),
        logging: LoggingConfig::default(),
    };

    let config = ConfigResolver::new().resolve_with(toml_config);

    // Trailing slash trimmed so paths can be appended
    assert_eq!(config.api_base_url, "https://funds.example.com/api");
    assert_eq!(config.data_folder, PathBuf::from("/tmp/fdash-toml"));
    assert_eq!(config.request_timeout, Duration::from_millis(5_000));
    assert_eq!(config.poll_interval, Duration::from_millis(500));
    assert_eq!(config.max_poll_failures, 2);
}

#[test]
#[serial]
fn test_env_overrides_toml() {
    clear_env();
    env::set_var(ENV_API_URL, "http://env.example.com");
    env::set_var(ENV_DATA_FOLDER, "/tmp/fdash-env");

    let toml_config = TomlConfig {
        api_base_url: Some("http://toml.example.com".to_string()),
        data_folder: Some(PathBuf::from("/tmp/fdash-toml")),
        ..Default::default()
    };

    let config = ConfigResolver::new().resolve_with(toml_config);

    assert_eq!(config.api_base_url, "http://env.example.com");
    assert_eq!(config.data_folder, PathBuf::from("/tmp/fdash-env"));

    clear_env();
}

#[test]
#[serial]
fn test_cli_overrides_env() {
    clear_env();
    env::set_var(ENV_API_URL, "http://env.example.com");

    let config = ConfigResolver::new()
        .with_api_url(Some("http://cli.example.com".to_string()))
        .with_data_folder(Some(PathBuf::from("/tmp/fdash-cli")))
        .resolve_with(TomlConfig::default());

    assert_eq!(config.api_base_url, "http://cli.example.com");
    assert_eq!(config.data_folder, PathBuf::from("/tmp/fdash-cli"));

    clear_env();
}

#[test]
#[serial]
fn test_zero_values_fall_back_to_defaults() {
    clear_env();

    let toml_config = TomlConfig {
        request_timeout_ms: Some(0),
        poll_interval_ms: Some(0),
        max_poll_failures: Some(0),
        ..Default::default()
    };

    let config = ConfigResolver::new().resolve_with(toml_config);

    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert_eq!(config.poll_interval, Duration::from_secs(2));
    assert_eq!(config.max_poll_failures, 5);
}

#[test]
#[serial]
fn test_explicit_config_file_is_loaded() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");

    let toml_config = TomlConfig {
        api_base_url: Some("http://file.example.com".to_string()),
        poll_interval_ms: Some(750),
        ..Default::default()
    };
    write_toml_config(&toml_config, &path).unwrap();

    let config = ConfigResolver::new()
        .with_config_file(Some(path))
        .resolve();

    assert_eq!(config.api_base_url, "http://file.example.com");
    assert_eq!(config.poll_interval, Duration::from_millis(750));
}

#[test]
#[serial]
fn test_config_file_from_env() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("env-config.toml");
    std::fs::write(&path, "api_base_url = \"http://envfile.example.com\"\n").unwrap();
    env::set_var(ENV_CONFIG_FILE, &path);

    let config = ConfigResolver::new().resolve();

    assert_eq!(config.api_base_url, "http://envfile.example.com");

    clear_env();
}

#[test]
#[serial]
fn test_missing_config_file_degrades_to_defaults() {
    clear_env();

    let config = ConfigResolver::new()
        .with_config_file(Some(PathBuf::from("/nonexistent/fdash/config.toml")))
        .resolve();

    assert_eq!(
        config.api_base_url,
        CompiledDefaults::for_current_platform().api_base_url
    );
}

#[test]
#[serial]
fn test_malformed_config_file_degrades_to_defaults() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "api_base_url = [not toml").unwrap();

    let config = ConfigResolver::new().with_config_file(Some(path)).resolve();

    assert_eq!(config.poll_interval, Duration::from_secs(2));
}

/// Fallback warnings are handed back so they survive until logging is up
#[test]
#[serial]
fn test_malformed_config_file_reports_warning() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "poll_interval_ms = \"fast\"").unwrap();

    let resolution = ConfigResolver::new()
        .with_config_file(Some(path))
        .resolution();

    assert_eq!(resolution.config.poll_interval, Duration::from_secs(2));
    assert_eq!(resolution.warnings.len(), 1);
    assert!(
        resolution.warnings[0].ends_with("using defaults"),
        "{:?}",
        resolution.warnings
    );
}

#[test]
#[serial]
fn test_zero_values_report_warnings() {
    clear_env();

    let toml_config = TomlConfig {
        request_timeout_ms: Some(0),
        max_poll_failures: Some(0),
        ..Default::default()
    };

    let resolution = ConfigResolver::new().resolution_with(toml_config);

    assert_eq!(resolution.warnings.len(), 2);
    assert!(resolution.warnings[0].starts_with("request_timeout_ms"));
    assert!(resolution.warnings[1].starts_with("max_poll_failures"));
    assert_eq!(resolution.config.max_poll_failures, 5);
}

#[test]
#[serial]
fn test_clean_resolution_has_no_warnings() {
    clear_env();

    let resolution = ConfigResolver::new().resolution_with(TomlConfig::default());

    assert!(resolution.warnings.is_empty());
}
