//! Configuration Manager

use super::{Config, OutputsConfig};
use crate::protocol::OutputId;
use crate::Result;
use anyhow::{bail, Context};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        // Override with environment variables if present
        if let Ok(bind_addr) = std::env::var("BUZZD_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid BUZZD_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(max_conn) = std::env::var("BUZZD_MAX_CONNECTIONS") {
            config.server.max_connections = max_conn
                .parse::<usize>()
                .with_context(|| format!("Invalid BUZZD_MAX_CONNECTIONS: {}", max_conn))?;
        }

        if let Ok(buffer_size) = std::env::var("BUZZD_BUFFER_SIZE") {
            config.server.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid BUZZD_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(timeout) = std::env::var("BUZZD_SHUTDOWN_TIMEOUT") {
            config.server.shutdown_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid BUZZD_SHUTDOWN_TIMEOUT: {}", timeout))?;
        }

        if let Ok(frequency) = std::env::var("BUZZD_PWM_FREQUENCY_HZ") {
            config.outputs.pwm_frequency_hz = frequency
                .parse::<u32>()
                .with_context(|| format!("Invalid BUZZD_PWM_FREQUENCY_HZ: {}", frequency))?;
        }

        if let Ok(metrics_addr) = std::env::var("BUZZD_METRICS_ADDR") {
            config.monitoring.metrics_addr = Some(
                metrics_addr
                    .parse::<SocketAddr>()
                    .with_context(|| format!("Invalid BUZZD_METRICS_ADDR: {}", metrics_addr))?,
            );
        }

        if let Ok(log_level) = std::env::var("BUZZD_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_outputs_config()
            .with_context(|| "Outputs configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    /// Validate server configuration
    fn validate_server_config(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.server.max_connections > 10000 {
            bail!("max_connections cannot exceed 10,000");
        }

        if self.server.buffer_size < 8 {
            bail!("buffer_size must be at least 8 bytes to hold a command");
        }

        if self.server.buffer_size > 65536 {
            bail!("buffer_size cannot exceed 64KB");
        }

        if self.server.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than 0");
        }

        Ok(())
    }

    /// Validate outputs configuration
    fn validate_outputs_config(&self) -> Result<()> {
        if self.outputs.pwm_frequency_hz == 0 {
            bail!("pwm_frequency_hz must be at least 1");
        }

        // Also checks the pin map shape
        let pins = self.outputs.output_pins()?;

        let mut seen = std::collections::HashSet::new();
        for (id, pin) in &pins {
            if *pin >= 64 {
                bail!("Output {} uses pin {}, which is not a valid BCM pin", id, pin);
            }
            if !seen.insert(*pin) {
                bail!("Pin {} is assigned to more than one output", pin);
            }
        }

        Ok(())
    }

    /// Validate monitoring configuration
    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        max_connections: Option<usize>,
        log_level: Option<&str>,
    ) {
        // Override bind address if provided
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        // Override port if provided
        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        // Override max connections if provided
        if let Some(max_conn) = max_connections {
            self.server.max_connections = max_conn;
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }

        // Override log level if provided
        if let Some(level) = log_level {
            self.monitoring.log_level = level.to_string();
            tracing::info!("CLI override: log level set to {}", level);
        }
    }
}

impl OutputsConfig {
    /// The pin map keyed by wire identifier.
    ///
    /// Fails when the map is empty or a key is not exactly one character.
    pub fn output_pins(&self) -> Result<HashMap<OutputId, u8>> {
        if self.pins.is_empty() {
            bail!("At least one output pin must be configured");
        }

        let mut pins = HashMap::new();
        for (key, &pin) in &self.pins {
            let mut chars = key.chars();
            let id = match (chars.next(), chars.next()) {
                (Some(token), None) => OutputId::new(token),
                _ => bail!("Output identifier {:?} must be exactly one character", key),
            };
            pins.insert(id, pin);
        }
        Ok(pins)
    }

    /// The known output identifiers, in stable order
    pub fn output_ids(&self) -> Result<Vec<OutputId>> {
        let mut ids: Vec<OutputId> = self.output_pins()?.into_keys().collect();
        ids.sort();
        Ok(ids)
    }
}
