//! TCP protocol - RFC 793
//!
//! Only the parts the reflector rewrites: ports and checksum.

use super::ipv4::pseudo_header_checksum;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum TCP header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// TCP protocol number for pseudo-header
pub const PROTOCOL_NUMBER: u8 = 6;

const CHECKSUM_OFFSET: usize = 16;

/// Parsed TCP header (zero-copy reference)
#[derive(Debug)]
pub struct TcpHeader<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> TcpHeader<'a> {
    /// Parse TCP header from a segment
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("TCP header too short".into()));
        }

        let header_len = ((buffer[12] >> 4) as usize) * 4;
        if header_len < MIN_HEADER_SIZE {
            return Err(Error::Parse("TCP data offset too small".into()));
        }

        if buffer.len() < header_len {
            return Err(Error::Parse("TCP header truncated".into()));
        }

        Ok(Self { buffer, header_len })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[16], self.buffer[17]])
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Validate checksum with pseudo-header
    pub fn validate_checksum(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> bool {
        tcp_checksum(src_ip, dst_ip, self.buffer) == 0
    }
}

/// Calculate TCP checksum with pseudo-header
pub fn tcp_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, tcp_segment: &[u8]) -> u16 {
    pseudo_header_checksum(src_ip, dst_ip, PROTOCOL_NUMBER, tcp_segment)
}

/// Recompute the checksum of a segment in place
pub fn update_checksum(segment: &mut [u8], src_ip: Ipv4Addr, dst_ip: Ipv4Addr) {
    segment[CHECKSUM_OFFSET] = 0;
    segment[CHECKSUM_OFFSET + 1] = 0;

    let sum = tcp_checksum(src_ip, dst_ip, segment);
    segment[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
}

/// Builds a minimal TCP segment (no options) with a valid checksum
#[derive(Debug, Clone, Default)]
pub struct TcpBuilder {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    flags: u8,
    payload: Vec<u8>,
}

impl TcpBuilder {
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

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    pub fn build(self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Vec<u8> {
        let mut buffer = vec![0u8; MIN_HEADER_SIZE];
        buffer[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buffer[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buffer[4..8].copy_from_slice(&self.seq.to_be_bytes());
        buffer[12] = ((MIN_HEADER_SIZE / 4) as u8) << 4;
        buffer[13] = self.flags;
        buffer[14..16].copy_from_slice(&65535u16.to_be_bytes());
        buffer.extend_from_slice(&self.payload);

        update_checksum(&mut buffer, src_ip, dst_ip);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    #[test]
    fn test_tcp_header_parse() {
        let seg = TcpBuilder::new()
            .src_port(40000)
            .dst_port(443)
            .flags(0x02)
            .build(SRC, DST);
        let hdr = TcpHeader::parse(&seg).unwrap();

        assert_eq!(hdr.src_port(), 40000);
        assert_eq!(hdr.dst_port(), 443);
        assert_eq!(hdr.header_len(), 20);
        assert!(hdr.validate_checksum(SRC, DST));
        assert!(!hdr.validate_checksum(DST, Ipv4Addr::new(10, 0, 0, 3)));
    }

    #[test]
    fn test_tcp_header_parse_errors() {
        assert!(TcpHeader::parse(&[0u8; 19]).is_err());

        let mut seg = TcpBuilder::new().build(SRC, DST);
        seg[12] = 0x40; // data offset 16 bytes
        assert!(TcpHeader::parse(&seg).is_err());

        seg[12] = 0x60; // 24 bytes but only 20 present
        assert!(TcpHeader::parse(&seg).is_err());
    }

    #[test]
    fn test_update_checksum_after_port_change() {
        let mut seg = TcpBuilder::new()
            .src_port(1)
            .dst_port(2)
            .payload(b"hello")
            .build(SRC, DST);
        seg[0..2].copy_from_slice(&9u16.to_be_bytes());
        assert!(!TcpHeader::parse(&seg).unwrap().validate_checksum(SRC, DST));

        update_checksum(&mut seg, SRC, DST);
        assert!(TcpHeader::parse(&seg).unwrap().validate_checksum(SRC, DST));
    }
}
