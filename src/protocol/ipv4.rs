//! IPv4 protocol - RFC 791

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// Offset of the header checksum field
const CHECKSUM_OFFSET: usize = 10;

/// IPv4 protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl Protocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Protocol::Icmp),
            6 => Some(Protocol::Tcp),
            17 => Some(Protocol::Udp),
            _ => None,
        }
    }
}

/// Parsed IPv4 header (zero-copy reference)
#[derive(Debug)]
pub struct Ipv4Header<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("IPv4 header too short".into()));
        }

        if buffer[0] >> 4 != 4 {
            return Err(Error::Parse("not an IPv4 packet".into()));
        }

        let header_len = ((buffer[0] & 0x0F) as usize) * 4;
        if header_len < MIN_HEADER_SIZE {
            return Err(Error::Parse("IPv4 IHL too small".into()));
        }

        if buffer.len() < header_len {
            return Err(Error::Parse("IPv4 header truncated".into()));
        }

        Ok(Self { buffer, header_len })
    }

    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn flags(&self) -> u8 {
        self.buffer[6] >> 5
    }

    /// Fragment offset in 8-byte units
    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]]) & 0x1FFF
    }

    pub fn more_fragments(&self) -> bool {
        (self.flags() & flags::MF) != 0
    }

    /// MF set or a non-zero offset
    pub fn is_fragment(&self) -> bool {
        self.more_fragments() || self.fragment_offset() > 0
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[8]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[10], self.buffer[11]])
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    /// Header length in bytes (IHL * 4)
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Length of the L4 payload according to the total length field,
    /// clamped to what the buffer actually holds.
    pub fn payload_len(&self) -> usize {
        let claimed = (self.total_length() as usize).saturating_sub(self.header_len);
        claimed.min(self.buffer.len() - self.header_len)
    }

    /// Validate header checksum
    pub fn validate_checksum(&self) -> bool {
        checksum(&self.buffer[..self.header_len]) == 0
    }
}

/// Fragment flags
pub mod flags {
    pub const DF: u8 = 0b010;
    pub const MF: u8 = 0b001;
}

/// Calculate the Internet checksum of a header
pub fn checksum(header: &[u8]) -> u16 {
    fold(sum_words(header, 0))
}

/// Swap source and destination addresses of the header in place.
pub fn swap_addrs(header: &mut [u8]) {
    let (src, dst) = header[12..20].split_at_mut(4);
    src.swap_with_slice(dst);
}

/// Recalculate the header checksum in place.
pub fn update_checksum(header: &mut [u8], header_len: usize) {
    header[CHECKSUM_OFFSET] = 0;
    header[CHECKSUM_OFFSET + 1] = 0;

    let sum = checksum(&header[..header_len]);
    header[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
}

/// Checksum of a TCP or UDP segment including the IPv4 pseudo-header
///
/// ```text
/// +--------+--------+--------+--------+
/// |          Source Address           |
/// +--------+--------+--------+--------+
/// |        Destination Address        |
/// +--------+--------+--------+--------+
/// |  Zero  |Protocol|  Segment Length |
/// +--------+--------+--------+--------+
/// ```
pub fn pseudo_header_checksum(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    protocol: u8,
    segment: &[u8],
) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src_ip.octets());
    pseudo[4..8].copy_from_slice(&dst_ip.octets());
    pseudo[9] = protocol;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());

    fold(sum_words(segment, sum_words(&pseudo, 0)))
}

fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u16::from_be_bytes([*last, 0]) as u32);
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Builder for constructing IPv4 packets (no options)
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    ttl: u8,
    protocol: u8,
    more_fragments: bool,
    fragment_offset: u16,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    payload: Vec<u8>,
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self {
            ttl: 64,
            protocol: 0,
            more_fragments: false,
            fragment_offset: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            payload: Vec::new(),
        }
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn more_fragments(mut self, mf: bool) -> Self {
        self.more_fragments = mf;
        self
    }

    pub fn fragment_offset(mut self, offset: u16) -> Self {
        self.fragment_offset = offset & 0x1FFF;
        self
    }

    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total_length = (MIN_HEADER_SIZE + self.payload.len()) as u16;
        let mut buffer = vec![0u8; MIN_HEADER_SIZE];

        buffer[0] = 0x45;
        buffer[2..4].copy_from_slice(&total_length.to_be_bytes());
        // DF unless this is a fragment
        let mut flags_frag = self.fragment_offset;
        if self.more_fragments {
            flags_frag |= 0x2000;
        } else if self.fragment_offset == 0 {
            flags_frag |= 0x4000;
        }
        buffer[6..8].copy_from_slice(&flags_frag.to_be_bytes());
        buffer[8] = self.ttl;
        buffer[9] = self.protocol;
        buffer[12..16].copy_from_slice(&self.src_addr.octets());
        buffer[16..20].copy_from_slice(&self.dst_addr.octets());
        update_checksum(&mut buffer, MIN_HEADER_SIZE);

        buffer.extend_from_slice(&self.payload);
        buffer
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}
