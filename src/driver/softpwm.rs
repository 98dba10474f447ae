//! Software PWM Driver
//!
//! Drives GPIO pins through the sysfs interface with one worker thread
//! per pin. Each worker toggles its pin's value file to approximate a
//! square wave at the configured frequency; the async side only flips
//! atomics, so activate and deactivate never block on hardware.

use crate::driver::BuzzerDriver;
use crate::protocol::OutputId;
use crate::Result;
use anyhow::Context;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const GPIO_ROOT: &str = "/sys/class/gpio";

/// Poll interval while an output sits idle at 0% duty
const IDLE_POLL: Duration = Duration::from_millis(2);

/// Software PWM driver over sysfs GPIO
pub struct SoftPwmDriver {
    workers: HashMap<OutputId, PinWorker>,
    released: AtomicBool,
}

struct PinWorker {
    pin: u8,
    duty: Arc<AtomicU8>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SoftPwmDriver {
    /// Export the configured pins, drive them low, and start one PWM
    /// worker thread per pin.
    pub fn new(pins: &HashMap<OutputId, u8>, frequency_hz: u32) -> Result<Self> {
        if frequency_hz == 0 {
            anyhow::bail!("PWM frequency must be at least 1 Hz");
        }

        let mut workers = HashMap::new();
        for (&id, &pin) in pins {
            export_pin(pin)?;

            let duty = Arc::new(AtomicU8::new(0));
            let stop = Arc::new(AtomicBool::new(false));
            let worker_duty = Arc::clone(&duty);
            let worker_stop = Arc::clone(&stop);

            let handle = thread::Builder::new()
                .name(format!("pwm-{}", id))
                .spawn(move || pwm_worker(pin, frequency_hz, worker_duty, worker_stop))
                .with_context(|| format!("Failed to spawn PWM worker for pin {}", pin))?;

            debug!("Started PWM worker for output {} on pin {}", id, pin);
            workers.insert(
                id,
                PinWorker {
                    pin,
                    duty,
                    stop,
                    handle: Mutex::new(Some(handle)),
                },
            );
        }

        info!(
            "GPIO driver ready: {} outputs at {} Hz",
            workers.len(),
            frequency_hz
        );
        Ok(Self {
            workers,
            released: AtomicBool::new(false),
        })
    }

    fn worker(&self, id: OutputId) -> Result<&PinWorker> {
        self.workers
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("No pin configured for output {}", id))
    }
}

impl BuzzerDriver for SoftPwmDriver {
    fn activate(&self, id: OutputId, duty_percent: u8) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            anyhow::bail!("Driver already released");
        }
        let worker = self.worker(id)?;
        worker.duty.store(duty_percent.min(100), Ordering::Relaxed);
        debug!(
            "Output {} (pin {}) driving at {}% duty",
            id,
            worker.pin,
            duty_percent.min(100)
        );
        Ok(())
    }

    fn deactivate(&self, id: OutputId) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            anyhow::bail!("Driver already released");
        }
        let worker = self.worker(id)?;
        worker.duty.store(0, Ordering::Relaxed);
        debug!("Output {} (pin {}) stopped", id, worker.pin);
        Ok(())
    }

    fn release_all(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for (id, worker) in &self.workers {
            worker.duty.store(0, Ordering::Relaxed);
            worker.stop.store(true, Ordering::Relaxed);

            if let Ok(mut handle) = worker.handle.lock() {
                if let Some(handle) = handle.take() {
                    if handle.join().is_err() {
                        warn!("PWM worker for output {} panicked", id);
                    }
                }
            }

            // The worker leaves its pin low on exit; unexport is best effort
            let unexport = PathBuf::from(GPIO_ROOT).join("unexport");
            if let Err(e) = fs::write(unexport, worker.pin.to_string()) {
                warn!("Failed to unexport GPIO pin {}: {}", worker.pin, e);
            }
        }

        info!("GPIO driver released");
        Ok(())
    }
}

/// Make the pin's sysfs attribute files available and drive it low
fn export_pin(pin: u8) -> Result<()> {
    let gpio_dir = PathBuf::from(GPIO_ROOT).join(format!("gpio{}", pin));
    if !gpio_dir.exists() {
        fs::write(PathBuf::from(GPIO_ROOT).join("export"), pin.to_string())
            .with_context(|| format!("Failed to export GPIO pin {}", pin))?;
        // The attribute files show up shortly after the export write
        thread::sleep(Duration::from_millis(50));
    }

    fs::write(gpio_dir.join("direction"), "out")
        .with_context(|| format!("Failed to set GPIO pin {} as output", pin))?;
    fs::write(gpio_dir.join("value"), "0")
        .with_context(|| format!("Failed to drive GPIO pin {} low", pin))?;
    Ok(())
}

/// Worker loop for one pin. Polls the shared duty setting and toggles
/// the value file; exits when the stop flag is set, leaving the pin low.
fn pwm_worker(pin: u8, frequency_hz: u32, duty: Arc<AtomicU8>, stop: Arc<AtomicBool>) {
    let value_path = PathBuf::from(GPIO_ROOT)
        .join(format!("gpio{}", pin))
        .join("value");
    let mut value = match OpenOptions::new().write(true).open(&value_path) {
        Ok(file) => file,
        Err(e) => {
            error!(
                "PWM worker cannot open {}: {}",
                value_path.display(),
                e
            );
            return;
        }
    };

    let period = Duration::from_secs(1) / frequency_hz;
    let mut high = false;

    while !stop.load(Ordering::Relaxed) {
        let duty_percent = duty.load(Ordering::Relaxed).min(100);
        if duty_percent == 0 {
            if high {
                if write_level(&mut value, false).is_err() {
                    break;
                }
                high = false;
            }
            thread::sleep(IDLE_POLL);
            continue;
        }

        let (on_time, off_time) = duty_slices(period, duty_percent);
        if !on_time.is_zero() {
            if write_level(&mut value, true).is_err() {
                break;
            }
            high = true;
            thread::sleep(on_time);
        }
        if !off_time.is_zero() {
            if write_level(&mut value, false).is_err() {
                break;
            }
            high = false;
            thread::sleep(off_time);
        }
    }

    if write_level(&mut value, false).is_err() {
        error!("PWM worker for pin {} could not leave the pin low", pin);
    }
}

/// Split one PWM period into its high and low slices
fn duty_slices(period: Duration, duty_percent: u8) -> (Duration, Duration) {
    let on_time = period * u32::from(duty_percent.min(100)) / 100;
    (on_time, period - on_time)
}

fn write_level(value: &mut File, high: bool) -> std::io::Result<()> {
    value.seek(SeekFrom::Start(0))?;
    value.write_all(if high { b"1" } else { b"0" })
}
