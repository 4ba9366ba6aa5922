//! Packet reflector
//!
//! Rewrites an admitted packet so it travels back toward its sender and
//! stages it on the output batch of the paired port.

use super::output_batch::{BatchSet, FlushOutcome};
use crate::port::{PacketBuf, PortId, PortMap};
use crate::protocol::ipv4::{self, Protocol};
use crate::protocol::{ethernet, tcp, udp, PacketLayout};
use crate::{Error, Result};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Swap the L2, L3 and L4 endpoints of a classified frame in place and fix
/// up the checksums. Applying it twice restores the original frame.
pub fn reflect(frame: &mut [u8], layout: &PacketLayout) {
    ethernet::swap_macs(frame);

    let ip = &mut frame[layout.l3_offset..layout.l3_offset + layout.l3_len];
    ipv4::swap_addrs(ip);
    ipv4::update_checksum(ip, layout.l3_len);
    // Already swapped: these are the addresses the reply carries
    let src = Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
    let dst = Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]);

    let Some(l4) = layout.l4 else {
        return;
    };
    let segment = &mut frame[l4.offset..l4.offset + l4.len];
    swap_ports(segment);
    match l4.protocol {
        Protocol::Tcp => tcp::update_checksum(segment, src, dst),
        Protocol::Udp => udp::update_checksum(segment, src, dst),
        Protocol::Icmp => {}
    }
}

/// TCP and UDP both start with source port then destination port
fn swap_ports(segment: &mut [u8]) {
    let (src, dst) = segment[0..4].split_at_mut(2);
    src.swap_with_slice(dst);
}

/// Sends admitted packets out through the port paired with their input
#[derive(Debug, Clone)]
pub struct Forwarder {
    port_map: Arc<PortMap>,
}

impl Forwarder {
    pub fn new(port_map: Arc<PortMap>) -> Self {
        Self { port_map }
    }

    pub fn output_port(&self, in_port: PortId) -> Option<PortId> {
        self.port_map.peer(in_port)
    }

    /// Reflect `frame` and append it to the output batch of `in_port`'s peer.
    ///
    /// The returned outcome reports any flush the append triggered.
    pub fn forward(
        &self,
        in_port: PortId,
        mut frame: PacketBuf,
        layout: &PacketLayout,
        batches: &mut BatchSet,
    ) -> Result<FlushOutcome> {
        let out_port = self
            .output_port(in_port)
            .ok_or(Error::PortNotFound(in_port))?;
        let batch = batches
            .get_mut(out_port)
            .ok_or(Error::PortNotFound(out_port))?;

        reflect(&mut frame, layout);
        Ok(batch.push(frame))
    }
}
