//! ICMP echo: answering pings in place and sending our own echo request.

use crate::checksum::{self, put_u16};
use crate::ethernet;
use crate::ipv4::{self, Ipv4Header};
use crate::types::{EtherType, IpProtocol, Ipv4Addr, MacAddr};

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_HEADER_LEN: usize = 8;

const CSUM_OFF: usize = 2;

/// Validated ICMP message inside an IPv4 frame.
fn parse(frame: &[u8]) -> Option<(Ipv4Header, u8)> {
    let ip = ipv4::parse_header(frame)?;
    if ip.protocol() != Some(IpProtocol::Icmp) || ip.payload_len() < ICMP_HEADER_LEN {
        return None;
    }
    let icmp = &frame[ip.payload_range()];
    if !checksum::verify(icmp) {
        return None;
    }
    Some((ip, icmp[0]))
}

pub fn is_ping_request(frame: &[u8]) -> bool {
    parse(frame).is_some_and(|(_, kind)| kind == ICMP_ECHO_REQUEST)
}

pub fn is_ping_response(frame: &[u8]) -> bool {
    parse(frame).is_some_and(|(_, kind)| kind == ICMP_ECHO_REPLY)
}

/// Turn the echo request held in `frame` into the matching reply: swap both
/// address pairs, set type 0 and recompute the checksum over the ICMP
/// message only. Identifier, sequence and data are echoed unchanged.
pub fn write_ping_response_in_place(frame: &mut [u8], local_mac: MacAddr) -> Option<usize> {
    let (ip, kind) = parse(frame)?;
    if kind != ICMP_ECHO_REQUEST {
        return None;
    }
    ethernet::reflect_header(frame, local_mac);
    ipv4::reflect_addresses(frame, ip.header_len);
    let icmp = &mut frame[ip.payload_range()];
    icmp[0] = ICMP_ECHO_REPLY;
    put_u16(icmp, CSUM_OFF, 0);
    let sum = checksum::checksum(icmp);
    put_u16(icmp, CSUM_OFF, sum);
    Some(ipv4::IP_OFF + ip.total_len)
}

/// Build an 8-byte echo request (identifier and sequence zero).
pub fn write_ping_request(
    frame: &mut [u8],
    local: (MacAddr, Ipv4Addr),
    remote: (MacAddr, Ipv4Addr),
) -> usize {
    ethernet::write_header(frame, remote.0, local.0, EtherType::Ipv4);
    let off = ipv4::write_header(frame, local.1, remote.1, IpProtocol::Icmp, ICMP_HEADER_LEN);
    let icmp = &mut frame[off..off + ICMP_HEADER_LEN];
    icmp.fill(0);
    icmp[0] = ICMP_ECHO_REQUEST;
    let sum = checksum::checksum(icmp);
    put_u16(icmp, CSUM_OFF, sum);
    off + ICMP_HEADER_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: (MacAddr, Ipv4Addr) = (MacAddr([2, 0, 0, 0, 0, 0xa]), Ipv4Addr([10, 0, 0, 10]));
    const B: (MacAddr, Ipv4Addr) = (MacAddr([2, 0, 0, 0, 0, 0xb]), Ipv4Addr([10, 0, 0, 11]));

    #[test]
    fn request_then_in_place_reply() {
        let mut frame = [0u8; 64];
        let len = write_ping_request(&mut frame, A, B);
        assert_eq!(len, 14 + 20 + 8);
        assert!(is_ping_request(&frame[..len]));
        assert!(!is_ping_response(&frame[..len]));

        let reply_len = write_ping_response_in_place(&mut frame[..len], B.0).expect("reply");
        assert_eq!(reply_len, len);
        assert!(is_ping_response(&frame[..len]));
        let ip = ipv4::parse_header(&frame[..len]).expect("ip");
        assert_eq!(ip.src, B.1);
        assert_eq!(ip.dst, A.1);
        assert_eq!(&frame[0..6], &A.0.0);
    }

    #[test]
    fn reply_echoes_payload() {
        let mut frame = [0u8; 80];
        ethernet::write_header(&mut frame, B.0, A.0, EtherType::Ipv4);
        let off = ipv4::write_header(&mut frame, A.1, B.1, IpProtocol::Icmp, 12);
        frame[off] = ICMP_ECHO_REQUEST;
        frame[off + 4..off + 8].copy_from_slice(&[0x12, 0x34, 0x00, 0x07]);
        frame[off + 8..off + 12].copy_from_slice(b"ping");
        let sum = checksum::checksum(&frame[off..off + 12]);
        put_u16(&mut frame, off + 2, sum);
        let len = off + 12;

        write_ping_response_in_place(&mut frame[..len], B.0).expect("reply");
        assert_eq!(&frame[off + 4..off + 12], b"\x12\x34\x00\x07ping");
        assert!(checksum::verify(&frame[off..len]));
    }

    #[test]
    fn bad_icmp_checksum_dropped() {
        let mut frame = [0u8; 64];
        let len = write_ping_request(&mut frame, A, B);
        frame[len - 1] ^= 0xff;
        assert!(!is_ping_request(&frame[..len]));
    }
}
