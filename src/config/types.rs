//! Configuration Types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub outputs: OutputsConfig,
    pub monitoring: MonitoringConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_connections: usize,
    /// Maximum inbound message length in bytes
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Output configuration: the PWM carrier and the pin map.
///
/// Pin map keys are the single-character identifiers clients use on the
/// wire; values are BCM pin numbers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputsConfig {
    pub pwm_frequency_hz: u32,
    pub pins: HashMap<String, u8>,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:8765".parse().unwrap(),
                max_connections: 64,
                buffer_size: 1024,
                shutdown_timeout: Duration::from_secs(10),
            },
            outputs: OutputsConfig {
                pwm_frequency_hz: 2000,
                pins: HashMap::from([
                    ("0".to_string(), 14),
                    ("1".to_string(), 4),
                    ("2".to_string(), 15),
                ]),
            },
            monitoring: MonitoringConfig {
                log_level: "info".to_string(),
                metrics_addr: Some("127.0.0.1:9090".parse().unwrap()),
            },
        }
    }
}
