//! UDP datagram view and reply construction.

use core::ops::Range;

use crate::checksum::{self, get_u16, put_u16};
use crate::ethernet;
use crate::ipv4;
use crate::types::{EtherType, IpProtocol, Ipv4Addr, MacAddr, Port, SockAddr};

pub const UDP_HEADER_LEN: usize = 8;

/// Addresses and payload location of a received datagram. Holds no borrow
/// of the frame, so it survives the buffer being reused for the reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdpDatagram {
    pub src_mac: MacAddr,
    pub src: SockAddr,
    pub dst: SockAddr,
    pub payload: Range<usize>,
}

/// Parse a UDP datagram. A non-zero checksum must verify.
pub fn parse(frame: &[u8]) -> Option<UdpDatagram> {
    let eth = ethernet::parse_header(frame)?;
    let ip = ipv4::parse_header(frame)?;
    if ip.protocol() != Some(IpProtocol::Udp) || ip.payload_len() < UDP_HEADER_LEN {
        return None;
    }
    let range = ip.payload_range();
    let seg = &frame[range.clone()];
    let udp_len = get_u16(seg, 4) as usize;
    if udp_len < UDP_HEADER_LEN || udp_len > seg.len() {
        return None;
    }
    if get_u16(seg, 6) != 0
        && !checksum::verify_transport(ip.src, ip.dst, IpProtocol::Udp, &seg[..udp_len])
    {
        return None;
    }
    Some(UdpDatagram {
        src_mac: eth.src,
        src: SockAddr::new(ip.src, Port(get_u16(seg, 0))),
        dst: SockAddr::new(ip.dst, Port(get_u16(seg, 2))),
        payload: range.start + UDP_HEADER_LEN..range.start + udp_len,
    })
}

#[inline]
pub fn is_udp(frame: &[u8]) -> bool {
    parse(frame).is_some()
}

/// Build a datagram into `frame` carrying `payload`. Returns the frame length.
pub fn write_datagram(
    frame: &mut [u8],
    local: (MacAddr, SockAddr),
    remote: (MacAddr, SockAddr),
    payload: &[u8],
) -> usize {
    let udp_len = UDP_HEADER_LEN + payload.len();
    ethernet::write_header(frame, remote.0, local.0, EtherType::Ipv4);
    let off = ipv4::write_header(frame, local.1.ip, remote.1.ip, IpProtocol::Udp, udp_len);
    let seg = &mut frame[off..off + udp_len];
    put_u16(seg, 0, local.1.port.as_u16());
    put_u16(seg, 2, remote.1.port.as_u16());
    put_u16(seg, 4, udp_len as u16);
    put_u16(seg, 6, 0);
    seg[UDP_HEADER_LEN..].copy_from_slice(payload);
    let sum = match checksum::transport_checksum(local.1.ip, remote.1.ip, IpProtocol::Udp, seg) {
        0 => 0xffff,
        sum => sum,
    };
    put_u16(seg, 6, sum);
    off + udp_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_roundtrip() {
        let local = (MacAddr([2; 6]), SockAddr::new(Ipv4Addr::new(10, 0, 0, 1), Port(7)));
        let remote = (MacAddr([4; 6]), SockAddr::new(Ipv4Addr::new(10, 0, 0, 2), Port(5000)));
        let mut frame = [0u8; 128];
        let len = write_datagram(&mut frame, local, remote, b"Received\0");
        assert_eq!(len, 14 + 20 + 8 + 9);

        let dgram = parse(&frame[..len]).expect("udp");
        assert_eq!(dgram.src, local.1);
        assert_eq!(dgram.dst, remote.1);
        assert_eq!(dgram.src_mac, local.0);
        assert_eq!(&frame[dgram.payload], b"Received\0");
    }

    #[test]
    fn corrupt_payload_rejected_zero_checksum_accepted() {
        let local = (MacAddr([2; 6]), SockAddr::new(Ipv4Addr::new(10, 0, 0, 1), Port(7)));
        let remote = (MacAddr([4; 6]), SockAddr::new(Ipv4Addr::new(10, 0, 0, 2), Port(9)));
        let mut frame = [0u8; 128];
        let len = write_datagram(&mut frame, local, remote, b"abc");
        frame[len - 1] ^= 1;
        assert!(!is_udp(&frame[..len]));
        put_u16(&mut frame, 34 + 6, 0);
        assert!(is_udp(&frame[..len]));
    }
}
