//! IPv4 header validation and construction.
//!
//! Offsets in this module are relative to the start of the Ethernet frame;
//! the IP header always begins at [`IP_OFF`].

use core::ops::Range;

use crate::checksum::{self, get_u16, put_u16};
use crate::ethernet::{self, ETH_HEADER_LEN};
use crate::types::{EtherType, IpProtocol, Ipv4Addr};

pub const IP_OFF: usize = ETH_HEADER_LEN;
pub const IPV4_HEADER_LEN: usize = 20;
pub const DEFAULT_TTL: u8 = 128;

const TOTAL_LEN_OFF: usize = 2;
const ID_OFF: usize = 4;
const FRAG_OFF: usize = 6;
const TTL_OFF: usize = 8;
const PROTO_OFF: usize = 9;
const CSUM_OFF: usize = 10;
const SRC_OFF: usize = 12;
const DST_OFF: usize = 16;

/// Validated view of an IPv4 header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Header length in bytes.
    pub header_len: usize,
    pub total_len: usize,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    #[inline]
    pub fn protocol(&self) -> Option<IpProtocol> {
        IpProtocol::from_u8(self.protocol)
    }

    /// Frame range of the transport segment.
    #[inline]
    pub fn payload_range(&self) -> Range<usize> {
        IP_OFF + self.header_len..IP_OFF + self.total_len
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.total_len - self.header_len
    }
}

/// Parse and validate the IP header of an Ethernet frame.
///
/// Rejects anything that is not IPv4, has a bad IHL, claims more bytes than
/// the frame holds (trailing link padding is allowed), or fails the header
/// checksum.
pub fn parse_header(frame: &[u8]) -> Option<Ipv4Header> {
    let eth = ethernet::parse_header(frame)?;
    if eth.kind() != Some(EtherType::Ipv4) {
        return None;
    }
    let ip = frame.get(IP_OFF..)?;
    if ip.len() < IPV4_HEADER_LEN {
        return None;
    }
    if ip[0] >> 4 != 4 {
        return None;
    }
    let header_len = ((ip[0] & 0x0f) as usize) * 4;
    if header_len < IPV4_HEADER_LEN || ip.len() < header_len {
        return None;
    }
    let total_len = get_u16(ip, TOTAL_LEN_OFF) as usize;
    if total_len < header_len || total_len > ip.len() {
        return None;
    }
    if !checksum::verify(&ip[..header_len]) {
        return None;
    }
    Some(Ipv4Header {
        header_len,
        total_len,
        ttl: ip[TTL_OFF],
        protocol: ip[PROTO_OFF],
        src: Ipv4Addr::read(ip, SRC_OFF)?,
        dst: Ipv4Addr::read(ip, DST_OFF)?,
    })
}

/// Frame carries a well-formed IPv4 packet.
#[inline]
pub fn is_ip(frame: &[u8]) -> bool {
    parse_header(frame).is_some()
}

/// Frame carries a well-formed IPv4 packet addressed to `local`.
#[inline]
pub fn is_ip_unicast(frame: &[u8], local: Ipv4Addr) -> bool {
    parse_header(frame).is_some_and(|hdr| hdr.dst == local)
}

/// Write a 20-byte IPv4 header for `payload_len` transport bytes and compute
/// its checksum. Returns the offset of the transport payload.
pub fn write_header(
    frame: &mut [u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: IpProtocol,
    payload_len: usize,
) -> usize {
    let ip = &mut frame[IP_OFF..IP_OFF + IPV4_HEADER_LEN];
    ip[0] = 0x45;
    ip[1] = 0;
    put_u16(ip, TOTAL_LEN_OFF, (IPV4_HEADER_LEN + payload_len) as u16);
    put_u16(ip, ID_OFF, 0);
    put_u16(ip, FRAG_OFF, 0);
    ip[TTL_OFF] = DEFAULT_TTL;
    ip[PROTO_OFF] = protocol.as_u8();
    put_u16(ip, CSUM_OFF, 0);
    ip[SRC_OFF..SRC_OFF + 4].copy_from_slice(&src.0);
    ip[DST_OFF..DST_OFF + 4].copy_from_slice(&dst.0);
    let sum = checksum::checksum(ip);
    put_u16(ip, CSUM_OFF, sum);
    IP_OFF + IPV4_HEADER_LEN
}

/// Swap source and destination of a received header and refresh its checksum.
pub fn reflect_addresses(frame: &mut [u8], header_len: usize) {
    let ip = &mut frame[IP_OFF..IP_OFF + header_len];
    let mut src = [0u8; 4];
    src.copy_from_slice(&ip[SRC_OFF..SRC_OFF + 4]);
    ip.copy_within(DST_OFF..DST_OFF + 4, SRC_OFF);
    ip[DST_OFF..DST_OFF + 4].copy_from_slice(&src);
    put_u16(ip, CSUM_OFF, 0);
    let sum = checksum::checksum(ip);
    put_u16(ip, CSUM_OFF, sum);
}
