//! Metrics System Demo
//!
//! Demonstrates the metrics collection and the Prometheus endpoint
//! without running the full server.

use buzzd::metrics::{Metrics, MetricsServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let metrics = Arc::new(Metrics::new());

    let server = MetricsServer::new(Arc::clone(&metrics), "127.0.0.1:9090".to_string());
    tokio::spawn(async move {
        if let Err(e) = server.start().await {
            eprintln!("Metrics server error: {}", e);
        }
    });

    println!("Prometheus metrics available at http://127.0.0.1:9090/metrics");

    // Simulate a few client sessions
    simulate_sessions(&metrics).await;

    let summary = metrics.get_activity_summary();
    println!("\nCurrent Activity:");
    println!("  Total connections: {}", summary.total_connections);
    println!("  Total commands: {}", summary.total_commands);
    println!("  Invalid commands: {}", summary.invalid_commands);
    println!("  Total activations: {}", summary.total_activations);
    println!("  Driver errors: {}", summary.driver_errors);

    println!("\nPrometheus export:");
    println!("{}", metrics.export_prometheus());

    println!("Keeping the endpoint up for 30 seconds...");
    sleep(Duration::from_secs(30)).await;

    println!("Metrics demo finished");
    Ok(())
}

async fn simulate_sessions(metrics: &Metrics) {
    println!("Simulating sessions...");

    for i in 0..10 {
        metrics.on_connection_opened();

        // Most commands are valid activations, a few are rejected
        if i % 3 == 0 {
            metrics.on_command(false);
        } else {
            metrics.on_command(true);
            metrics.on_activation_started();
            sleep(Duration::from_millis(50)).await;
            metrics.on_activation_finished();
        }

        metrics.on_connection_closed();
    }

    println!("Simulated {} sessions", 10);
}
