//! Metrics Module
//!
//! Handles metrics collection and export.

pub mod collector;
pub mod server;

pub use collector::{ActivitySummary, Metrics};
pub use server::MetricsServer;
