//! Connection Manager Implementation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::driver::OutputRegistry;
use crate::metrics::Metrics;
use crate::protocol::BuzzerHandler;
use crate::Result;

/// Connection information for tracking
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub addr: SocketAddr,
    pub start_time: Instant,
}

/// Manages TCP connections and their lifecycle
pub struct ConnectionManager {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    registry: Arc<OutputRegistry>,
    metrics: Arc<Metrics>,
    connection_limit: Arc<Semaphore>,
    active_connections: Arc<AtomicUsize>,
    connection_tracker: Arc<RwLock<HashMap<String, ConnectionInfo>>>,
    next_connection_id: Arc<AtomicUsize>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(config: Arc<Config>, registry: Arc<OutputRegistry>, metrics: Arc<Metrics>) -> Self {
        let max_connections = config.server.max_connections;
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            listener: None,
            config,
            registry,
            metrics,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            active_connections: Arc::new(AtomicUsize::new(0)),
            connection_tracker: Arc::new(RwLock::new(HashMap::new())),
            next_connection_id: Arc::new(AtomicUsize::new(1)),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Bind the TCP listener and return the address it actually bound to.
    ///
    /// Split from [`start`](Self::start) so callers binding port 0 can
    /// discover the assigned port before the accept loop runs.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let bind_addr = self.config.server.bind_addr;

        info!("Binding TCP listener to {}", bind_addr);
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Server started on {}", local_addr);
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Start accepting connections, binding first if needed
    pub async fn start(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        self.accept_connections().await
    }

    /// Main connection acceptance loop
    async fn accept_connections(&self) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Listener not initialized"))?;

        info!("Starting connection acceptance loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown flag set, stopping connection acceptance");
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);

                            if self.shutdown_flag.load(Ordering::Relaxed) {
                                debug!("Rejecting connection from {} due to shutdown", addr);
                                continue;
                            }

                            let permit = match Arc::clone(&self.connection_limit).try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        "Connection limit reached ({}), rejecting connection from {}",
                                        self.config.server.max_connections, addr
                                    );
                                    continue;
                                }
                            };

                            let connection_id = format!(
                                "conn_{}",
                                self.next_connection_id.fetch_add(1, Ordering::Relaxed)
                            );
                            let conn_info = ConnectionInfo {
                                id: connection_id.clone(),
                                addr,
                                start_time: Instant::now(),
                            };

                            let registry = Arc::clone(&self.registry);
                            let metrics = Arc::clone(&self.metrics);
                            let buffer_size = self.config.server.buffer_size;
                            let active_connections = Arc::clone(&self.active_connections);
                            let connection_tracker = Arc::clone(&self.connection_tracker);
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                // The permit frees a connection slot when this task ends
                                let _permit = permit;

                                active_connections.fetch_add(1, Ordering::Relaxed);
                                metrics.on_connection_opened();
                                {
                                    let mut tracker = connection_tracker.write().await;
                                    tracker.insert(connection_id.clone(), conn_info);
                                }

                                info!("Client connected: {} from {}", connection_id, addr);

                                let result = Self::handle_connection_with_shutdown(
                                    stream,
                                    registry,
                                    Arc::clone(&metrics),
                                    buffer_size,
                                    connection_id.clone(),
                                    shutdown_rx,
                                )
                                .await;

                                match result {
                                    Ok(()) => {
                                        debug!("Connection {} completed successfully", connection_id);
                                    }
                                    Err(e) => {
                                        error!("Error handling connection {}: {}", connection_id, e);
                                    }
                                }

                                {
                                    let mut tracker = connection_tracker.write().await;
                                    if let Some(removed) = tracker.remove(&connection_id) {
                                        info!(
                                            "Client disconnected: {} from {} after {:?}",
                                            connection_id,
                                            addr,
                                            removed.start_time.elapsed()
                                        );
                                    }
                                }

                                metrics.on_connection_closed();
                                active_connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            // Keep accepting even if one accept fails
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    self.shutdown_flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    /// Run one connection's message loop until it finishes or shutdown
    /// arrives.
    ///
    /// On shutdown the select drops the handler future mid-await, which
    /// releases any in-flight activation through its guard before this
    /// function returns.
    async fn handle_connection_with_shutdown(
        stream: TcpStream,
        registry: Arc<OutputRegistry>,
        metrics: Arc<Metrics>,
        buffer_size: usize,
        connection_id: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut handler = BuzzerHandler::new(stream, registry, metrics, buffer_size);

        tokio::select! {
            result = handler.run() => {
                debug!("Handler closed for connection {}", connection_id);
                result
            }
            _ = shutdown_rx.recv() => {
                info!("Connection {} received shutdown signal, closing gracefully", connection_id);
                Ok(())
            }
        }
    }

    /// Get the number of active connections
    pub fn get_active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get the bind address if the listener is initialized
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Initiate graceful shutdown
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of connection manager");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to connection handlers: {}", e);
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Wait for all connections to close gracefully
    pub async fn wait_for_connections_to_close(&self) -> Result<()> {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        info!(
            "Waiting for {} active connections to close (timeout: {:?})",
            self.get_active_connections(),
            shutdown_timeout
        );

        while self.get_active_connections() > 0 && start_time.elapsed() < shutdown_timeout {
            debug!(
                "Waiting for {} active connections to close",
                self.get_active_connections()
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.get_active_connections();
        let elapsed = start_time.elapsed();

        if remaining == 0 {
            info!("All connections closed gracefully in {:?}", elapsed);
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} connections still active",
                elapsed, remaining
            );
        }

        Ok(())
    }

    /// Gracefully shutdown the connection manager
    pub async fn shutdown(&self) -> Result<()> {
        self.initiate_shutdown();
        self.wait_for_connections_to_close().await
    }
}
