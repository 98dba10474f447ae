//! buzzd Library
//!
//! Network-controlled buzzer daemon for Raspberry Pi GPIO.
//!
//! Exposes a small set of PWM-driven buzzer outputs over a persistent
//! line-oriented TCP connection: clients send short text commands, the
//! server activates the named output at a fixed duty for a fixed hold
//! window and reports status back.

pub mod config;
pub mod connection;
pub mod driver;
pub mod metrics;
pub mod protocol;
pub mod shutdown;

pub use config::Config;
pub use connection::ConnectionManager;
pub use driver::{BuzzerDriver, MockDriver, OutputRegistry};
pub use shutdown::ShutdownCoordinator;

/// Common error type for the buzzer server
pub type Result<T> = anyhow::Result<T>;
