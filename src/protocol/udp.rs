//! UDP protocol - RFC 768

use super::ipv4::pseudo_header_checksum;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// UDP header size (fixed)
pub const HEADER_SIZE: usize = 8;

/// UDP protocol number for pseudo-header
pub const PROTOCOL_NUMBER: u8 = 17;

const CHECKSUM_OFFSET: usize = 6;

/// Parsed UDP header (zero-copy reference)
#[derive(Debug)]
pub struct UdpHeader<'a> {
    buffer: &'a [u8],
}

impl<'a> UdpHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("UDP header too short".into()));
        }

        Ok(Self { buffer })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// Length (header + data)
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// Checksum; 0 means "not computed", which is legal over IPv4
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    /// Validate checksum with pseudo-header. An absent checksum is valid.
    pub fn validate_checksum(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> bool {
        if self.checksum() == 0 {
            return true;
        }
        udp_checksum(src_ip, dst_ip, self.buffer) == 0
    }
}

/// Calculate UDP checksum with pseudo-header
pub fn udp_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, udp_datagram: &[u8]) -> u16 {
    pseudo_header_checksum(src_ip, dst_ip, PROTOCOL_NUMBER, udp_datagram)
}

/// Recompute the checksum of a datagram in place.
///
/// A datagram sent without a checksum keeps it absent.
pub fn update_checksum(datagram: &mut [u8], src_ip: Ipv4Addr, dst_ip: Ipv4Addr) {
    if datagram[CHECKSUM_OFFSET] == 0 && datagram[CHECKSUM_OFFSET + 1] == 0 {
        return;
    }
    datagram[CHECKSUM_OFFSET] = 0;
    datagram[CHECKSUM_OFFSET + 1] = 0;

    let sum = udp_checksum(src_ip, dst_ip, datagram);
    // 0 on the wire means "no checksum"
    let sum = if sum == 0 { 0xFFFF } else { sum };
    datagram[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
}

/// UDP datagram builder
#[derive(Debug, Clone, Default)]
pub struct UdpBuilder {
    src_port: u16,
    dst_port: u16,
    payload: Vec<u8>,
    no_checksum: bool,
}

impl UdpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    /// Leave the checksum field at zero
    pub fn without_checksum(mut self) -> Self {
        self.no_checksum = true;
        self
    }

    pub fn build(self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Vec<u8> {
        let length = (HEADER_SIZE + self.payload.len()) as u16;
        let mut buffer = Vec::with_capacity(length as usize);
        buffer.extend_from_slice(&self.src_port.to_be_bytes());
        buffer.extend_from_slice(&self.dst_port.to_be_bytes());
        buffer.extend_from_slice(&length.to_be_bytes());
        buffer.extend_from_slice(&[0, 0]);
        buffer.extend_from_slice(&self.payload);

        if !self.no_checksum {
            let sum = udp_checksum(src_ip, dst_ip, &buffer);
            let sum = if sum == 0 { 0xFFFF } else { sum };
            buffer[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
        }
        buffer
    }
}
