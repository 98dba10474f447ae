//! Buzzer Protocol Handler
//!
//! Runs the message loop for one client connection: read a line, parse
//! it, drive the output through its hold window, reply. Commands on the
//! same connection are strictly sequential; concurrency only exists
//! across connections.

use super::{parse_command, Command, OutputId, Reply};
use crate::driver::OutputRegistry;
use crate::metrics::Metrics;
use crate::protocol::constants::*;
use crate::Result;
use anyhow::anyhow;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

/// Protocol handler for one client connection.
///
/// Generic over the stream so tests can run it against scripted IO; the
/// server always hands it a `TcpStream`.
pub struct BuzzerHandler<S> {
    stream: BufReader<S>,
    registry: Arc<OutputRegistry>,
    metrics: Arc<Metrics>,
    max_message_len: usize,
}

impl<S> BuzzerHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a handler for the given stream
    pub fn new(
        stream: S,
        registry: Arc<OutputRegistry>,
        metrics: Arc<Metrics>,
        max_message_len: usize,
    ) -> Self {
        Self {
            stream: BufReader::new(stream),
            registry,
            metrics,
            max_message_len,
        }
    }

    /// Process messages until the client disconnects
    pub async fn run(&mut self) -> Result<()> {
        while let Some(message) = self.read_message().await? {
            self.process_message(&message).await?;
        }
        Ok(())
    }

    /// Read one newline-terminated message.
    ///
    /// Returns `None` on a clean disconnect. A line longer than the
    /// configured maximum is a framing error and ends the connection. A
    /// final unterminated line before EOF is still processed.
    async fn read_message(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = (&mut self.stream)
            .take(self.max_message_len as u64)
            .read_line(&mut line)
            .await
            .map_err(|e| anyhow!("Failed to read message: {}", e))?;

        if n == 0 {
            return Ok(None);
        }
        if !line.ends_with('\n') && n == self.max_message_len {
            return Err(anyhow!(
                "Message exceeds maximum length of {} bytes",
                self.max_message_len
            ));
        }

        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    async fn process_message(&mut self, message: &str) -> Result<()> {
        debug!("Received message: {:?}", message);
        match parse_command(message, self.registry.ids()) {
            Command::Activate { id } => {
                self.metrics.on_command(true);
                self.handle_activate(id).await
            }
            Command::Invalid => {
                self.metrics.on_command(false);
                debug!("Rejected message: {:?}", message);
                self.send_reply(Reply::Invalid).await
            }
        }
    }

    /// Drive one output through the activate, hold, deactivate cycle.
    ///
    /// The activation guard covers every exit from this function, so the
    /// output is stopped even when a reply write fails partway through.
    async fn handle_activate(&mut self, id: OutputId) -> Result<()> {
        let guard = match self
            .registry
            .begin_activation(id, ACTIVATION_DUTY_PERCENT)
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                error!("Failed to activate output {}: {}", id, e);
                self.metrics.on_driver_error();
                return self.send_reply(Reply::Invalid).await;
            }
        };

        info!("Buzzer {} ON", id);
        self.send_reply(Reply::TurnedOn(id)).await?;

        tokio::time::sleep(ACTIVATION_HOLD).await;

        if let Err(e) = guard.release() {
            error!("Failed to deactivate output {}: {}", id, e);
            self.metrics.on_driver_error();
        }
        info!("Buzzer {} OFF", id);
        self.send_reply(Reply::TurnedOff(id)).await
    }

    async fn send_reply(&mut self, reply: Reply) -> Result<()> {
        let mut line = reply.to_string();
        line.push('\n');
        self.stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| anyhow!("Failed to send reply: {}", e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| anyhow!("Failed to flush reply: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;
    use std::time::Duration;
    use tokio_test::io::Builder;

    fn harness(driver: Arc<MockDriver>) -> (Arc<OutputRegistry>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let ids = [OutputId::new('0'), OutputId::new('1'), OutputId::new('2')];
        let registry = Arc::new(OutputRegistry::new(driver, ids, Arc::clone(&metrics)));
        (registry, metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_holds_then_stops() {
        let driver = Arc::new(MockDriver::new());
        let (registry, metrics) = harness(Arc::clone(&driver));
        let stream = Builder::new()
            .read(b"on_0\n")
            .write(b"Buzzer 0 turned ON\n")
            .write(b"Buzzer 0 turned OFF after 3 seconds\n")
            .build();

        let start = tokio::time::Instant::now();
        let mut handler = BuzzerHandler::new(stream, registry, metrics, 1024);
        handler.run().await.unwrap();

        assert!(start.elapsed() >= ACTIVATION_HOLD);
        let id = OutputId::new('0');
        assert_eq!(driver.activate_count(id), 1);
        assert_eq!(driver.deactivate_count(id), 1);
        assert!(driver.active_outputs().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_message_gets_reply_and_no_driver_call() {
        let driver = Arc::new(MockDriver::new());
        let (registry, metrics) = harness(Arc::clone(&driver));
        let stream = Builder::new()
            .read(b"hello\n")
            .write(b"Invalid command\n")
            .build();

        let mut handler = BuzzerHandler::new(stream, registry, Arc::clone(&metrics), 1024);
        handler.run().await.unwrap();

        assert!(driver.calls().is_empty());
        assert_eq!(metrics.get_activity_summary().invalid_commands, 1);
    }

    #[tokio::test]
    async fn test_empty_line_is_invalid() {
        let driver = Arc::new(MockDriver::new());
        let (registry, metrics) = harness(Arc::clone(&driver));
        let stream = Builder::new()
            .read(b"\n")
            .write(b"Invalid command\n")
            .build();

        let mut handler = BuzzerHandler::new(stream, registry, metrics, 1024);
        handler.run().await.unwrap();
        assert!(driver.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_carriage_return_is_stripped() {
        let driver = Arc::new(MockDriver::new());
        let (registry, metrics) = harness(Arc::clone(&driver));
        let stream = Builder::new()
            .read(b"on_1\r\n")
            .write(b"Buzzer 1 turned ON\n")
            .write(b"Buzzer 1 turned OFF after 3 seconds\n")
            .build();

        let mut handler = BuzzerHandler::new(stream, registry, metrics, 1024);
        handler.run().await.unwrap();
        assert_eq!(driver.activate_count(OutputId::new('1')), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_on_one_connection_are_sequential() {
        let driver = Arc::new(MockDriver::new());
        let (registry, metrics) = harness(Arc::clone(&driver));
        let stream = Builder::new()
            .read(b"on_0\non_1\n")
            .write(b"Buzzer 0 turned ON\n")
            .write(b"Buzzer 0 turned OFF after 3 seconds\n")
            .write(b"Buzzer 1 turned ON\n")
            .write(b"Buzzer 1 turned OFF after 3 seconds\n")
            .build();

        let start = tokio::time::Instant::now();
        let mut handler = BuzzerHandler::new(stream, registry, metrics, 1024);
        handler.run().await.unwrap();

        // Two full cycles back to back, never overlapping
        assert!(start.elapsed() >= ACTIVATION_HOLD * 2);
        use crate::driver::DriverCall;
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::Activate {
                    id: OutputId::new('0'),
                    duty_percent: ACTIVATION_DUTY_PERCENT
                },
                DriverCall::Deactivate {
                    id: OutputId::new('0')
                },
                DriverCall::Activate {
                    id: OutputId::new('1'),
                    duty_percent: ACTIVATION_DUTY_PERCENT
                },
                DriverCall::Deactivate {
                    id: OutputId::new('1')
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_activate_failure_replies_invalid_and_continues() {
        let driver = Arc::new(MockDriver::new());
        let (registry, metrics) = harness(Arc::clone(&driver));
        driver.set_fail_activate(true);
        let stream = Builder::new()
            .read(b"on_0\n")
            .write(b"Invalid command\n")
            .build();

        let mut handler = BuzzerHandler::new(stream, registry, Arc::clone(&metrics), 1024);
        handler.run().await.unwrap();

        assert!(driver.active_outputs().is_empty());
        assert_eq!(metrics.get_activity_summary().driver_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_failure_still_replies_off() {
        let driver = Arc::new(MockDriver::new());
        let (registry, metrics) = harness(Arc::clone(&driver));
        driver.set_fail_deactivate(true);
        let stream = Builder::new()
            .read(b"on_2\n")
            .write(b"Buzzer 2 turned ON\n")
            .write(b"Buzzer 2 turned OFF after 3 seconds\n")
            .build();

        let mut handler = BuzzerHandler::new(stream, registry, Arc::clone(&metrics), 1024);
        handler.run().await.unwrap();

        // One stop attempt, no retry
        assert_eq!(driver.deactivate_count(OutputId::new('2')), 1);
        assert_eq!(metrics.get_activity_summary().driver_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reply_write_still_deactivates() {
        let driver = Arc::new(MockDriver::new());
        let (registry, metrics) = harness(Arc::clone(&driver));
        let stream = Builder::new()
            .read(b"on_0\n")
            .write_error(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .build();

        let mut handler = BuzzerHandler::new(stream, registry, metrics, 1024);
        assert!(handler.run().await.is_err());

        // The guard stopped the output when the connection died
        assert_eq!(driver.deactivate_count(OutputId::new('0')), 1);
        assert!(driver.active_outputs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_mid_hold_deactivates() {
        let driver = Arc::new(MockDriver::new());
        let (registry, metrics) = harness(Arc::clone(&driver));
        let stream = Builder::new()
            .read(b"on_0\n")
            .write(b"Buzzer 0 turned ON\n")
            .build();

        let mut handler = BuzzerHandler::new(stream, registry, metrics, 1024);
        let task = tokio::spawn(async move { handler.run().await });

        // Let the activation start, then kill the task mid-hold
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(driver.is_active(OutputId::new('0')));
        task.abort();
        let _ = task.await;

        assert!(!driver.is_active(OutputId::new('0')));
        assert_eq!(driver.deactivate_count(OutputId::new('0')), 1);
    }

    #[tokio::test]
    async fn test_overlong_line_ends_the_connection() {
        let driver = Arc::new(MockDriver::new());
        let (registry, metrics) = harness(Arc::clone(&driver));
        // Exactly max_message_size bytes, no newline
        let stream = Builder::new().read(b"aaaaaaaa").build();

        let mut handler = BuzzerHandler::new(stream, registry, metrics, 8);
        assert!(handler.run().await.is_err());
        assert!(driver.calls().is_empty());
    }
}
