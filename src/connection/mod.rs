//! Connection Management Module
//!
//! Handles TCP connection acceptance, management, and lifecycle.

pub mod manager;

pub use manager::{ConnectionInfo, ConnectionManager};
