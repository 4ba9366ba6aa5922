//! ratefwd - Packet reflector with an inline rate limiter
//!
//! Worker threads poll paired ports, limit each IPv4 source address to a
//! packet and byte budget per one-second window, and send admitted packets
//! back toward their sender through the paired port.

pub mod config;
pub mod dataplane;
pub mod error;
pub mod port;
pub mod protocol;
pub mod runtime;
pub mod telemetry;

pub use error::{Error, Result};
