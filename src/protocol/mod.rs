//! Packet formats handled by the dataplane
//!
//! Parsing is zero-copy; rewriting happens in place on the received buffer.

pub mod ethernet;
pub mod ipv4;
pub mod packet;
pub mod tcp;
pub mod types;
pub mod udp;

pub use packet::{L4Layout, PacketLayout, PacketView};
pub use types::*;
