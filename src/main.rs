//! buzzd - Networked Buzzer Controller
//!
//! A small TCP server that drives PWM buzzer outputs on Raspberry Pi
//! GPIO pins. Clients hold a persistent connection and send one-line
//! text commands; each valid command pulses the named output for a
//! fixed hold window and reports status back on the same connection.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use buzzd::config::ConfigManager;
use buzzd::driver::SoftPwmDriver;
use buzzd::metrics::{Metrics, MetricsServer};
use buzzd::{BuzzerDriver, ConnectionManager, MockDriver, OutputRegistry, Result, ShutdownCoordinator};

/// Command line arguments for the buzzer server
#[derive(Parser, Debug)]
#[command(name = "buzzd")]
#[command(about = "Networked buzzer controller for Raspberry Pi GPIO")]
#[command(version)]
#[command(
    long_about = "buzzd exposes GPIO buzzer outputs over a line-based TCP protocol.

Configuration is loaded from a TOML file when present, otherwise from
BUZZD_* environment variables (BUZZD_BIND_ADDR, BUZZD_MAX_CONNECTIONS,
BUZZD_BUFFER_SIZE, BUZZD_SHUTDOWN_TIMEOUT, BUZZD_PWM_FREQUENCY_HZ,
BUZZD_METRICS_ADDR, BUZZD_LOG_LEVEL). Command line flags override both."
)]
struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = "buzzd.toml")]
    config: PathBuf,

    /// Bind address (e.g. 0.0.0.0:8765), overrides the configuration file
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on, overrides the configured bind address port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Maximum number of concurrent client connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Use the in-memory mock driver instead of GPIO hardware
    #[arg(long)]
    mock: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    validate_config: bool,
}

/// Initialize the tracing subscriber
fn init_tracing(args: &CliArgs) {
    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_deref().unwrap_or("info")
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args);

    info!("Starting buzzd v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from file when present, otherwise from environment
    let mut config = if args.config.exists() {
        info!("Loading configuration from file: {:?}", args.config);
        ConfigManager::load_from_file(&args.config)
            .with_context(|| format!("Failed to load config file {:?}", args.config))?
    } else {
        info!(
            "Config file {:?} not found, loading from environment",
            args.config
        );
        ConfigManager::load_from_env().context("Failed to load config from environment")?
    };

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.max_connections,
        args.log_level.as_deref(),
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        let pins = config.outputs.output_pins()?;
        println!("Configuration is valid");
        println!("  Bind address:     {}", config.server.bind_addr);
        println!("  Max connections:  {}", config.server.max_connections);
        println!("  Buffer size:      {}", config.server.buffer_size);
        println!(
            "  Shutdown timeout: {}",
            humantime::format_duration(config.server.shutdown_timeout)
        );
        println!("  PWM frequency:    {} Hz", config.outputs.pwm_frequency_hz);
        for id in config.outputs.output_ids()? {
            println!("  Output '{}':       GPIO {}", id, pins[&id]);
        }
        println!("  Log level:        {}", config.monitoring.log_level);
        match config.monitoring.metrics_addr {
            Some(addr) => println!("  Metrics address:  {}", addr),
            None => println!("  Metrics address:  disabled"),
        }
        return Ok(());
    }

    info!("Bind address: {}", config.server.bind_addr);
    info!("Max connections: {}", config.server.max_connections);
    info!(
        "Outputs: {:?} at {} Hz",
        config.outputs.output_ids()?,
        config.outputs.pwm_frequency_hz
    );

    // Select the output driver. The mock driver keeps full protocol
    // behavior without touching /sys/class/gpio.
    let driver: Arc<dyn BuzzerDriver> = if args.mock {
        info!("Using mock output driver (no hardware access)");
        Arc::new(MockDriver::new())
    } else {
        let pins = config.outputs.output_pins()?;
        Arc::new(
            SoftPwmDriver::new(&pins, config.outputs.pwm_frequency_hz)
                .context("Failed to initialize GPIO output driver")?,
        )
    };

    let metrics = Arc::new(Metrics::new());

    let registry = Arc::new(OutputRegistry::new(
        Arc::clone(&driver),
        config.outputs.output_ids()?,
        Arc::clone(&metrics),
    ));

    // Optional Prometheus endpoint
    let metrics_handle = config.monitoring.metrics_addr.map(|addr| {
        let server = MetricsServer::new(Arc::clone(&metrics), addr.to_string());
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    let shutdown_coordinator = ShutdownCoordinator::new();

    let mut manager = ConnectionManager::new(
        Arc::new(config.clone()),
        Arc::clone(&registry),
        Arc::clone(&metrics),
    );
    let mut server_shutdown_rx = shutdown_coordinator.subscribe();

    let server_handle = tokio::spawn(async move {
        tokio::select! {
            result = manager.start() => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                }
            }
            _ = server_shutdown_rx.recv() => {
                info!("Server task received shutdown signal");
                manager.initiate_shutdown();
                if let Err(e) = manager.wait_for_connections_to_close().await {
                    error!("Error during connection cleanup: {}", e);
                }
            }
        }
    });

    info!("🚀 buzzd started successfully!");
    info!("🛑 Press Ctrl+C or send SIGTERM for graceful shutdown");

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Signal listener error: {}", e);
        shutdown_coordinator.trigger_shutdown();
    }

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    if let Some(handle) = metrics_handle {
        handle.abort();
        info!("Metrics server stopped");
    }

    // Every connection is drained at this point; release the hardware last
    if let Err(e) = driver.release_all() {
        error!("Failed to release output driver: {}", e);
    }

    let summary = metrics.get_activity_summary();
    info!(
        "Session totals: {} connections, {} commands ({} invalid), {} activations, {} driver errors",
        summary.total_connections,
        summary.total_commands,
        summary.invalid_commands,
        summary.total_activations,
        summary.driver_errors
    );

    info!("Server shutdown complete");
    Ok(())
}
