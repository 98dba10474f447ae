//! Mock Driver
//!
//! In-memory driver used by the test suite and by `--mock` runs on
//! machines without buzzer hardware. It records every call it sees,
//! including calls set up to fail, so tests can assert exact sequences.

use crate::driver::BuzzerDriver;
use crate::protocol::OutputId;
use crate::Result;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// One recorded driver call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    Activate { id: OutputId, duty_percent: u8 },
    Deactivate { id: OutputId },
    ReleaseAll,
}

/// Driver that records calls instead of touching hardware
pub struct MockDriver {
    calls: Mutex<Vec<DriverCall>>,
    active: Mutex<HashSet<OutputId>>,
    released: AtomicBool,
    fail_activate: AtomicBool,
    fail_deactivate: AtomicBool,
}

impl MockDriver {
    /// Create a mock driver with no recorded calls
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            active: Mutex::new(HashSet::new()),
            released: AtomicBool::new(false),
            fail_activate: AtomicBool::new(false),
            fail_deactivate: AtomicBool::new(false),
        }
    }

    /// Make subsequent `activate` calls fail
    pub fn set_fail_activate(&self, fail: bool) {
        self.fail_activate.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `deactivate` calls fail
    pub fn set_fail_deactivate(&self, fail: bool) {
        self.fail_deactivate.store(fail, Ordering::SeqCst);
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Outputs currently being driven, in stable order
    pub fn active_outputs(&self) -> Vec<OutputId> {
        let mut ids: Vec<OutputId> = self
            .active
            .lock()
            .map(|a| a.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Whether the given output is currently being driven
    pub fn is_active(&self, id: OutputId) -> bool {
        self.active.lock().map(|a| a.contains(&id)).unwrap_or(false)
    }

    /// Whether `release_all` has been called
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Number of `activate` calls seen for the given output
    pub fn activate_count(&self, id: OutputId) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, DriverCall::Activate { id: called, .. } if *called == id))
            .count()
    }

    /// Number of `deactivate` calls seen for the given output
    pub fn deactivate_count(&self, id: OutputId) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, DriverCall::Deactivate { id: called } if *called == id))
            .count()
    }

    fn record(&self, call: DriverCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl BuzzerDriver for MockDriver {
    fn activate(&self, id: OutputId, duty_percent: u8) -> Result<()> {
        if self.is_released() {
            anyhow::bail!("Driver already released");
        }
        self.record(DriverCall::Activate { id, duty_percent });
        if self.fail_activate.load(Ordering::SeqCst) {
            anyhow::bail!("Injected activate failure for output {}", id);
        }
        if let Ok(mut active) = self.active.lock() {
            active.insert(id);
        }
        debug!("Mock output {} activated at {}% duty", id, duty_percent);
        Ok(())
    }

    fn deactivate(&self, id: OutputId) -> Result<()> {
        if self.is_released() {
            anyhow::bail!("Driver already released");
        }
        self.record(DriverCall::Deactivate { id });
        if self.fail_deactivate.load(Ordering::SeqCst) {
            anyhow::bail!("Injected deactivate failure for output {}", id);
        }
        if let Ok(mut active) = self.active.lock() {
            active.remove(&id);
        }
        debug!("Mock output {} deactivated", id);
        Ok(())
    }

    fn release_all(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.record(DriverCall::ReleaseAll);
        debug!("Mock driver released");
        Ok(())
    }
}
