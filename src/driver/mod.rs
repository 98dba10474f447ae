//! Output Driver Layer
//!
//! This module abstracts the buzzer hardware behind a small trait so the
//! server logic stays independent of how outputs are actually driven.
//! Two implementations ship with the binary: a sysfs-backed software PWM
//! driver for real pins and an in-memory mock for tests and dry runs.

pub mod mock;
pub mod registry;
pub mod softpwm;

pub use mock::{DriverCall, MockDriver};
pub use registry::{ActivationGuard, OutputRegistry};
pub use softpwm::SoftPwmDriver;

use crate::protocol::OutputId;
use crate::Result;

/// Hardware abstraction for the controllable outputs.
///
/// Calls are expected to return quickly; anything that drives a pin over
/// time does so on its own worker, not inside these methods. All methods
/// take `&self` because one driver instance is shared across every
/// connection task.
pub trait BuzzerDriver: Send + Sync {
    /// Start driving an output at the given duty cycle
    fn activate(&self, id: OutputId, duty_percent: u8) -> Result<()>;

    /// Stop driving an output
    fn deactivate(&self, id: OutputId) -> Result<()>;

    /// Stop all outputs and free the underlying device.
    ///
    /// Called exactly once at shutdown, after every individual output has
    /// already been deactivated. Implementations should tolerate a second
    /// call without touching the hardware again.
    fn release_all(&self) -> Result<()>;
}
