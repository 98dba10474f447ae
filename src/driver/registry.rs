//! Output Registry
//!
//! Tracks the outputs the server controls and serializes activations so
//! that two connections can never drive the same output at once. Every
//! activation is handed out as a guard that stops the output when it is
//! released or dropped, which is what keeps a buzzer from sounding
//! forever when a connection dies mid-hold.

use crate::driver::BuzzerDriver;
use crate::metrics::Metrics;
use crate::protocol::OutputId;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error};

/// Registry of controllable outputs with one activation lock per output
pub struct OutputRegistry {
    driver: Arc<dyn BuzzerDriver>,
    metrics: Arc<Metrics>,
    locks: HashMap<OutputId, Arc<Mutex<()>>>,
    ids: Vec<OutputId>,
}

impl OutputRegistry {
    /// Create a registry over the given driver and output set
    pub fn new(
        driver: Arc<dyn BuzzerDriver>,
        ids: impl IntoIterator<Item = OutputId>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let mut ids: Vec<OutputId> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();

        let locks = ids
            .iter()
            .map(|id| (*id, Arc::new(Mutex::new(()))))
            .collect();

        Self {
            driver,
            metrics,
            locks,
            ids,
        }
    }

    /// The identifiers this registry knows, in stable order
    pub fn ids(&self) -> &[OutputId] {
        &self.ids
    }

    /// Activate an output, waiting for any in-flight activation of the
    /// same output to finish first.
    ///
    /// On success the output is already being driven and the returned
    /// guard owns both the hardware state and the per-output lock. If the
    /// driver refuses the activation the lock is released immediately and
    /// nothing is left to clean up.
    pub async fn begin_activation(&self, id: OutputId, duty_percent: u8) -> Result<ActivationGuard> {
        let lock = self
            .locks
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("Unknown output: {}", id))?;

        let slot = Arc::clone(lock).lock_owned().await;
        self.driver.activate(id, duty_percent)?;
        self.metrics.on_activation_started();
        debug!("Output {} activated at {}% duty", id, duty_percent);

        Ok(ActivationGuard {
            driver: Arc::clone(&self.driver),
            metrics: Arc::clone(&self.metrics),
            id,
            armed: true,
            _slot: slot,
        })
    }
}

/// Holds one output active until released or dropped.
///
/// [`release`](ActivationGuard::release) is the normal path and surfaces
/// driver errors to the caller. Dropping an armed guard stops the output
/// as a safety net, so a cancelled connection task deactivates whatever
/// it was driving. Either way the output is stopped exactly once.
pub struct ActivationGuard {
    driver: Arc<dyn BuzzerDriver>,
    metrics: Arc<Metrics>,
    id: OutputId,
    armed: bool,
    _slot: OwnedMutexGuard<()>,
}

impl ActivationGuard {
    /// The output this guard holds active
    pub fn id(&self) -> OutputId {
        self.id
    }

    /// Deactivate the output and consume the guard.
    ///
    /// The guard is disarmed before the driver call, so the drop hook
    /// never issues a second stop even when the driver reports an error.
    pub fn release(mut self) -> Result<()> {
        self.armed = false;
        self.metrics.on_activation_finished();
        self.driver.deactivate(self.id)
    }
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        self.metrics.on_activation_finished();
        if let Err(e) = self.driver.deactivate(self.id) {
            error!("Failed to deactivate output {} during cleanup: {}", self.id, e);
        }
    }
}
