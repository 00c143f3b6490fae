//! 16-bit one's-complement Internet checksum.
//!
//! The IPv4 header, ICMP and TCP/UDP (over a pseudo-header) all use the same
//! two steps: accumulate big-endian words with [`sum_words`], then fold and
//! invert with [`finalize`]. Accumulation may be split across several calls;
//! every chunk except the last must have even length.

use crate::types::{IpProtocol, Ipv4Addr};

/// Add `data` to `acc` as big-endian 16-bit words. An odd trailing byte is
/// treated as the high byte of a zero-padded word.
pub fn sum_words(data: &[u8], mut acc: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        acc = acc.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        acc = acc.wrapping_add((*last as u32) << 8);
    }
    acc
}

/// Fold carries back into the low 16 bits and return the one's complement.
pub fn finalize(mut acc: u32) -> u16 {
    while (acc >> 16) != 0 {
        acc = (acc & 0xffff) + (acc >> 16);
    }
    !(acc as u16)
}

/// Checksum of a buffer whose checksum field is already zeroed.
#[inline]
pub fn checksum(data: &[u8]) -> u16 {
    finalize(sum_words(data, 0))
}

/// Verification pass over as-received bytes, checksum field included.
#[inline]
pub fn verify(data: &[u8]) -> bool {
    checksum(data) == 0
}

/// Accumulator seeded with the TCP/UDP pseudo-header.
pub fn pseudo_header_sum(src: Ipv4Addr, dst: Ipv4Addr, protocol: IpProtocol, len: u16) -> u32 {
    let mut acc = sum_words(&src.0, 0);
    acc = sum_words(&dst.0, acc);
    acc = acc.wrapping_add(protocol.as_u8() as u32);
    acc.wrapping_add(len as u32)
}

/// Checksum of a transport segment (checksum field zeroed) under its pseudo-header.
pub fn transport_checksum(src: Ipv4Addr, dst: Ipv4Addr, protocol: IpProtocol, segment: &[u8]) -> u16 {
    let acc = pseudo_header_sum(src, dst, protocol, segment.len() as u16);
    finalize(sum_words(segment, acc))
}

/// Verify a received transport segment, checksum field included.
pub fn verify_transport(src: Ipv4Addr, dst: Ipv4Addr, protocol: IpProtocol, segment: &[u8]) -> bool {
    transport_checksum(src, dst, protocol, segment) == 0
}

/// Store `value` big-endian at `off`.
#[inline]
pub(crate) fn put_u16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_be_bytes());
}

#[inline]
pub(crate) fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

#[inline]
pub(crate) fn put_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_be_bytes());
}

#[inline]
pub(crate) fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}
