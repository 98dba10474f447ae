//! Metrics Collector

use prometheus::{Counter, Gauge, Registry, TextEncoder};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// Collects and exports server metrics
pub struct Metrics {
    prometheus_registry: Registry,

    // Prometheus metrics
    connections_total: Counter,
    active_connections: Gauge,
    commands_total: Counter,
    invalid_commands_total: Counter,
    activations_total: Counter,
    active_activations: Gauge,
    driver_errors_total: Counter,

    // Internal counters for the shutdown summary
    total_connections: AtomicU64,
    total_commands: AtomicU64,
    total_invalid_commands: AtomicU64,
    total_activations: AtomicU64,
    total_driver_errors: AtomicU64,
}

/// Totals reported when the server stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySummary {
    pub total_connections: u64,
    pub total_commands: u64,
    pub invalid_commands: u64,
    pub total_activations: u64,
    pub driver_errors: u64,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let prometheus_registry = Registry::new();

        // Create Prometheus metrics
        let connections_total = Counter::new(
            "buzzd_connections_total",
            "Total number of client connections",
        )
        .expect("Failed to create connections_total counter");

        let active_connections = Gauge::new(
            "buzzd_active_connections",
            "Number of currently connected clients",
        )
        .expect("Failed to create active_connections gauge");

        let commands_total = Counter::new(
            "buzzd_commands_total",
            "Total number of messages processed",
        )
        .expect("Failed to create commands_total counter");

        let invalid_commands_total = Counter::new(
            "buzzd_invalid_commands_total",
            "Total number of messages rejected by the command grammar",
        )
        .expect("Failed to create invalid_commands_total counter");

        let activations_total = Counter::new(
            "buzzd_activations_total",
            "Total number of buzzer activations",
        )
        .expect("Failed to create activations_total counter");

        let active_activations = Gauge::new(
            "buzzd_active_activations",
            "Number of outputs currently being driven",
        )
        .expect("Failed to create active_activations gauge");

        let driver_errors_total = Counter::new(
            "buzzd_driver_errors_total",
            "Total number of errors reported by the output driver",
        )
        .expect("Failed to create driver_errors_total counter");

        // Register metrics
        prometheus_registry
            .register(Box::new(connections_total.clone()))
            .expect("Failed to register connections_total");
        prometheus_registry
            .register(Box::new(active_connections.clone()))
            .expect("Failed to register active_connections");
        prometheus_registry
            .register(Box::new(commands_total.clone()))
            .expect("Failed to register commands_total");
        prometheus_registry
            .register(Box::new(invalid_commands_total.clone()))
            .expect("Failed to register invalid_commands_total");
        prometheus_registry
            .register(Box::new(activations_total.clone()))
            .expect("Failed to register activations_total");
        prometheus_registry
            .register(Box::new(active_activations.clone()))
            .expect("Failed to register active_activations");
        prometheus_registry
            .register(Box::new(driver_errors_total.clone()))
            .expect("Failed to register driver_errors_total");

        Self {
            prometheus_registry,
            connections_total,
            active_connections,
            commands_total,
            invalid_commands_total,
            activations_total,
            active_activations,
            driver_errors_total,
            total_connections: AtomicU64::new(0),
            total_commands: AtomicU64::new(0),
            total_invalid_commands: AtomicU64::new(0),
            total_activations: AtomicU64::new(0),
            total_driver_errors: AtomicU64::new(0),
        }
    }

    /// Record a newly accepted client connection
    pub fn on_connection_opened(&self) {
        self.connections_total.inc();
        self.active_connections.inc();
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a client connection ending
    pub fn on_connection_closed(&self) {
        self.active_connections.dec();
    }

    /// Record one processed message and whether it parsed
    pub fn on_command(&self, valid: bool) {
        self.commands_total.inc();
        self.total_commands.fetch_add(1, Ordering::Relaxed);
        if !valid {
            self.invalid_commands_total.inc();
            self.total_invalid_commands.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an output starting to be driven
    pub fn on_activation_started(&self) {
        self.activations_total.inc();
        self.active_activations.inc();
        self.total_activations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an output no longer being driven
    pub fn on_activation_finished(&self) {
        self.active_activations.dec();
    }

    /// Record an error returned by the output driver
    pub fn on_driver_error(&self) {
        self.driver_errors_total.inc();
        self.total_driver_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus_registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }

    /// Get number of outputs currently being driven
    pub fn get_active_activations(&self) -> u64 {
        self.active_activations.get().max(0.0) as u64
    }

    /// Get lifetime totals for the shutdown log
    pub fn get_activity_summary(&self) -> ActivitySummary {
        ActivitySummary {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_commands: self.total_commands.load(Ordering::Relaxed),
            invalid_commands: self.total_invalid_commands.load(Ordering::Relaxed),
            total_activations: self.total_activations.load(Ordering::Relaxed),
            driver_errors: self.total_driver_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_feed_summary_and_export() {
        let metrics = Metrics::new();

        metrics.on_connection_opened();
        metrics.on_command(true);
        metrics.on_command(false);
        metrics.on_activation_started();
        metrics.on_activation_finished();
        metrics.on_connection_closed();

        let summary = metrics.get_activity_summary();
        assert_eq!(summary.total_connections, 1);
        assert_eq!(summary.total_commands, 2);
        assert_eq!(summary.invalid_commands, 1);
        assert_eq!(summary.total_activations, 1);
        assert_eq!(metrics.get_active_activations(), 0);

        let exported = metrics.export_prometheus();
        assert!(exported.contains("buzzd_connections_total 1"));
        assert!(exported.contains("buzzd_invalid_commands_total 1"));
        assert!(exported.contains("buzzd_active_activations 0"));
    }
}
