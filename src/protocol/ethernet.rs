//! Ethernet frame parsing and in-place rewriting

use super::{EtherType, MacAddr, VlanTag};
use crate::{Error, Result};

/// Ethernet header size without a VLAN tag
pub const HEADER_SIZE: usize = 14;
/// Extra bytes an 802.1Q tag inserts before the inner EtherType
pub const VLAN_TAG_SIZE: usize = 4;
/// Maximum Ethernet frame size (without FCS, with VLAN tag)
pub const MAX_FRAME_SIZE: usize = 1522;

/// Parsed Ethernet frame (zero-copy reference)
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
    vlan_tag: Option<VlanTag>,
    payload_offset: usize,
}

impl<'a> Frame<'a> {
    /// Parse an Ethernet frame, stepping over at most one VLAN tag
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("frame too short".into()));
        }

        let outer = u16::from_be_bytes([buffer[12], buffer[13]]);

        let (vlan_tag, payload_offset) = if outer == EtherType::Vlan as u16 {
            if buffer.len() < HEADER_SIZE + VLAN_TAG_SIZE {
                return Err(Error::Parse("VLAN frame too short".into()));
            }
            let tag = VlanTag::from_bytes([buffer[14], buffer[15]]);
            (Some(tag), HEADER_SIZE + VLAN_TAG_SIZE)
        } else {
            (None, HEADER_SIZE)
        };

        Ok(Self {
            buffer,
            vlan_tag,
            payload_offset,
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

    /// EtherType of the payload (the inner one for tagged frames)
    pub fn ethertype(&self) -> u16 {
        let offset = self.payload_offset - 2;
        u16::from_be_bytes([self.buffer[offset], self.buffer[offset + 1]])
    }

    pub fn vlan_tag(&self) -> Option<VlanTag> {
        self.vlan_tag
    }

    /// Offset of the first payload byte within the frame
    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.payload_offset..]
    }
}

/// Swap source and destination MAC addresses in place.
///
/// `frame` must hold at least the 12 address bytes.
pub fn swap_macs(frame: &mut [u8]) {
    let (dst, rest) = frame.split_at_mut(6);
    dst.swap_with_slice(&mut rest[..6]);
}

/// Builder for constructing Ethernet frames
#[derive(Debug, Default)]
pub struct FrameBuilder {
    dst: MacAddr,
    src: MacAddr,
    vlan: Option<VlanTag>,
    ethertype: u16,
    payload: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dst_mac(mut self, mac: MacAddr) -> Self {
        self.dst = mac;
        self
    }

    pub fn src_mac(mut self, mac: MacAddr) -> Self {
        self.src = mac;
        self
    }

    pub fn vlan_tag(mut self, tag: VlanTag) -> Self {
        self.vlan = Some(tag);
        self
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.ethertype = ethertype;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(MAX_FRAME_SIZE);
        buffer.extend_from_slice(&self.dst.0);
        buffer.extend_from_slice(&self.src.0);
        if let Some(tag) = self.vlan {
            buffer.extend_from_slice(&(EtherType::Vlan as u16).to_be_bytes());
            buffer.extend_from_slice(&tag.to_bytes());
        }
        buffer.extend_from_slice(&self.ethertype.to_be_bytes());
        buffer.extend_from_slice(&self.payload);
        buffer
    }
}
