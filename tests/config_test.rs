//! Configuration Loading Integration Tests

use anyhow::Result;
use buzzd::config::ConfigManager;
use buzzd::Config;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_config(port: u16, max_connections: usize) -> String {
    format!(
        r#"
[server]
bind_addr = "127.0.0.1:{}"
max_connections = {}
buffer_size = 512
shutdown_timeout = "5s"

[outputs]
pwm_frequency_hz = 1000

[outputs.pins]
"0" = 14
"1" = 4

[monitoring]
log_level = "debug"
metrics_addr = "127.0.0.1:9100"
"#,
        port, max_connections
    )
}

#[test]
fn test_load_full_config_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("buzzd.toml");
    fs::write(&config_path, create_test_config(8800, 16))?;

    let config = ConfigManager::load_from_file(&config_path)?;

    assert_eq!(config.server.bind_addr.port(), 8800);
    assert_eq!(config.server.max_connections, 16);
    assert_eq!(config.server.buffer_size, 512);
    assert_eq!(config.server.shutdown_timeout, Duration::from_secs(5));
    assert_eq!(config.outputs.pwm_frequency_hz, 1000);
    assert_eq!(config.outputs.pins.len(), 2);
    assert_eq!(config.outputs.pins["0"], 14);
    assert_eq!(config.monitoring.log_level, "debug");
    assert_eq!(
        config.monitoring.metrics_addr,
        Some("127.0.0.1:9100".parse()?)
    );
    Ok(())
}

#[test]
fn test_missing_file_falls_back_to_defaults() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("does_not_exist.toml");

    let config = ConfigManager::load_from_file(&config_path)?;

    assert_eq!(config.server.bind_addr.port(), 8765);
    assert_eq!(config.server.max_connections, 64);
    assert_eq!(config.outputs.output_ids()?.len(), 3);
    Ok(())
}

#[test]
fn test_malformed_toml_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("buzzd.toml");
    fs::write(&config_path, "not toml at all [[[")?;

    assert!(ConfigManager::load_from_file(&config_path).is_err());
    Ok(())
}

#[test]
fn test_validation_rejects_out_of_range_values() {
    let mut config = Config::default();
    config.server.max_connections = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.server.max_connections = 20_000;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.server.buffer_size = 4;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.server.shutdown_timeout = Duration::ZERO;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.outputs.pwm_frequency_hz = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.monitoring.log_level = "loud".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_validation_rejects_bad_pin_maps() {
    // Same pin on two outputs
    let mut config = Config::default();
    config.outputs.pins.insert("3".to_string(), 14);
    assert!(config.validate().is_err());

    // Identifier longer than one character
    let mut config = Config::default();
    config.outputs.pins.insert("10".to_string(), 20);
    assert!(config.validate().is_err());

    // Pin outside the BCM range
    let mut config = Config::default();
    config.outputs.pins.insert("3".to_string(), 64);
    assert!(config.validate().is_err());

    // No outputs at all
    let mut config = Config::default();
    config.outputs.pins.clear();
    assert!(config.validate().is_err());
}

#[test]
fn test_env_overrides_are_applied() -> Result<()> {
    std::env::set_var("BUZZD_BIND_ADDR", "127.0.0.1:8900");
    std::env::set_var("BUZZD_MAX_CONNECTIONS", "8");
    std::env::set_var("BUZZD_SHUTDOWN_TIMEOUT", "30s");
    std::env::set_var("BUZZD_LOG_LEVEL", "warn");

    let result = ConfigManager::load_from_env();

    std::env::remove_var("BUZZD_BIND_ADDR");
    std::env::remove_var("BUZZD_MAX_CONNECTIONS");
    std::env::remove_var("BUZZD_SHUTDOWN_TIMEOUT");
    std::env::remove_var("BUZZD_LOG_LEVEL");

    let config = result?;
    assert_eq!(config.server.bind_addr.port(), 8900);
    assert_eq!(config.server.max_connections, 8);
    assert_eq!(config.server.shutdown_timeout, Duration::from_secs(30));
    assert_eq!(config.monitoring.log_level, "warn");
    // Untouched fields keep their defaults
    assert_eq!(config.server.buffer_size, 1024);
    Ok(())
}

#[test]
fn test_cli_overrides_take_precedence() {
    let mut config = Config::default();
    config.merge_with_cli_args(
        Some("127.0.0.1:9999"),
        Some(4444),
        Some(5),
        Some("trace"),
    );

    // Port flag lands after the bind flag
    assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:4444");
    assert_eq!(config.server.max_connections, 5);
    assert_eq!(config.monitoring.log_level, "trace");
}

#[test]
fn test_invalid_cli_bind_is_ignored() {
    let mut config = Config::default();
    let original = config.server.bind_addr;
    config.merge_with_cli_args(Some("not-an-address"), None, None, None);
    assert_eq!(config.server.bind_addr, original);
}
