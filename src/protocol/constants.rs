//! Buzzer Protocol Constants

use std::time::Duration;

// Command grammar (fixed-offset, byte-for-byte compatible with existing
// wire clients: "on" + one ignored character + identifier)
pub const ACTIVATE_PREFIX: &str = "on";

// Character offset of the output identifier within an activate command.
// Offset 2 is unconstrained and never inspected.
pub const OUTPUT_ID_OFFSET: usize = 3;

// Activation policy, fixed for every activation; not client-configurable
pub const ACTIVATION_DUTY_PERCENT: u8 = 50;
pub const ACTIVATION_HOLD: Duration = Duration::from_secs(3);

// Reply literal for anything that does not parse as a command
pub const REPLY_INVALID: &str = "Invalid command";
