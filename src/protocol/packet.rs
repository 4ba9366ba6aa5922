//! Zero-copy view over a received frame
//!
//! Classifies a frame as IPv4 (optionally behind one 802.1Q tag) and exposes
//! the fields the rate limiter and the reflector need. Anything else is
//! unparseable and must be released by the caller.

use super::ethernet::Frame;
use super::ipv4::{Ipv4Header, Protocol};
use super::tcp::TcpHeader;
use super::udp::UdpHeader;
use super::{EtherType, MacAddr, VlanTag};
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Byte offsets of the headers inside the frame.
///
/// Detached from the view so the buffer can be borrowed mutably once
/// classification is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    /// Offset of the IPv4 header (14, or 18 behind a VLAN tag)
    pub l3_offset: usize,
    /// IPv4 header length in bytes
    pub l3_len: usize,
    /// Transport header, present only for unfragmented TCP/UDP with a
    /// complete header
    pub l4: Option<L4Layout>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L4Layout {
    pub protocol: Protocol,
    pub offset: usize,
    /// Segment length per the IPv4 total length (excludes Ethernet padding)
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ports {
    src: u16,
    dst: u16,
}

/// Parsed IPv4 packet
#[derive(Debug)]
pub struct PacketView<'a> {
    buffer: &'a [u8],
    vlan_tag: Option<VlanTag>,
    layout: PacketLayout,
    protocol: u8,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    ports: Option<Ports>,
}

impl<'a> PacketView<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        let frame = Frame::parse(buffer)?;
        if frame.ethertype() != EtherType::Ipv4 as u16 {
            return Err(Error::Parse(format!(
                "not IPv4 (ethertype {:#06x})",
                frame.ethertype()
            )));
        }

        let l3_offset = frame.payload_offset();
        let ip = Ipv4Header::parse(frame.payload())?;
        let l3_len = ip.header_len();
        let l4_offset = l3_offset + l3_len;
        let segment = &buffer[l4_offset..l4_offset + ip.payload_len()];

        // A fragment carries only part of the segment (or none of its
        // header), so it is never rewritten past IPv4
        let transport = if ip.is_fragment() {
            None
        } else {
            Protocol::from_u8(ip.protocol())
        };

        let (l4, ports) = match transport {
            Some(protocol @ Protocol::Tcp) => match TcpHeader::parse(segment) {
                Ok(tcp) => (
                    Some(protocol),
                    Some(Ports {
                        src: tcp.src_port(),
                        dst: tcp.dst_port(),
                    }),
                ),
                Err(_) => (None, None),
            },
            Some(protocol @ Protocol::Udp) => match UdpHeader::parse(segment) {
                Ok(udp) => (
                    Some(protocol),
                    Some(Ports {
                        src: udp.src_port(),
                        dst: udp.dst_port(),
                    }),
                ),
                Err(_) => (None, None),
            },
            _ => (None, None),
        };

        Ok(Self {
            buffer,
            vlan_tag: frame.vlan_tag(),
            layout: PacketLayout {
                l3_offset,
                l3_len,
                l4: l4.map(|protocol| L4Layout {
                    protocol,
                    offset: l4_offset,
                    len: segment.len(),
                }),
            },
            protocol: ip.protocol(),
            src_addr: ip.src_addr(),
            dst_addr: ip.dst_addr(),
            ports,
        })
    }

    pub fn dst_mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buffer[0..6]);
        MacAddr(mac)
    }

    pub fn src_mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buffer[6..12]);
        MacAddr(mac)
    }

    pub fn vlan_tag(&self) -> Option<VlanTag> {
        self.vlan_tag
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        self.src_addr
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        self.dst_addr
    }

    /// Raw IPv4 protocol number
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    pub fn src_port(&self) -> Option<u16> {
        self.ports.map(|p| p.src)
    }

    pub fn dst_port(&self) -> Option<u16> {
        self.ports.map(|p| p.dst)
    }

    pub fn layout(&self) -> PacketLayout {
        self.layout
    }

    /// Frame length in bytes, as counted against byte limits
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
