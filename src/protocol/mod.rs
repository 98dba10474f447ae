//! Buzzer Protocol Implementation
//!
//! This module contains the command grammar, the reply vocabulary, and
//! the per-connection message loop.

pub mod constants;
pub mod handler;
pub mod types;

pub use constants::*;
pub use handler::BuzzerHandler;
pub use types::*;
