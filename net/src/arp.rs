//! ARP for Ethernet/IPv4: recognising requests for our address, answering
//! them in place, and building the broadcast request that resolves a peer.

use crate::checksum::{get_u16, put_u16};
use crate::ethernet::{self, ETH_HEADER_LEN};
use crate::types::{EtherType, Ipv4Addr, MacAddr};

pub const ARP_HTYPE_ETHERNET: u16 = 1;
pub const ARP_HLEN_ETHERNET: u8 = 6;
pub const ARP_PLEN_IPV4: u8 = 4;
pub const ARP_OPER_REQUEST: u16 = 1;
pub const ARP_OPER_REPLY: u16 = 2;
pub const ARP_PACKET_LEN: usize = 28;
/// Length of a complete ARP frame as sent (no link padding).
pub const ARP_FRAME_LEN: usize = ETH_HEADER_LEN + ARP_PACKET_LEN;

const ARP_OFF: usize = ETH_HEADER_LEN;
const OPER_OFF: usize = ARP_OFF + 6;
const SHA_OFF: usize = ARP_OFF + 8;
const SPA_OFF: usize = ARP_OFF + 14;
const THA_OFF: usize = ARP_OFF + 18;
const TPA_OFF: usize = ARP_OFF + 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpPacket {
    pub oper: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

/// Decode an Ethernet/IPv4 ARP packet; anything else is `None`.
pub fn parse(frame: &[u8]) -> Option<ArpPacket> {
    let eth = ethernet::parse_header(frame)?;
    if eth.kind() != Some(EtherType::Arp) || frame.len() < ARP_FRAME_LEN {
        return None;
    }
    let arp = &frame[ARP_OFF..];
    if get_u16(arp, 0) != ARP_HTYPE_ETHERNET
        || get_u16(arp, 2) != EtherType::Ipv4.as_u16()
        || arp[4] != ARP_HLEN_ETHERNET
        || arp[5] != ARP_PLEN_IPV4
    {
        return None;
    }
    Some(ArpPacket {
        oper: get_u16(frame, OPER_OFF),
        sender_mac: MacAddr::read(frame, SHA_OFF)?,
        sender_ip: Ipv4Addr::read(frame, SPA_OFF)?,
        target_mac: MacAddr::read(frame, THA_OFF)?,
        target_ip: Ipv4Addr::read(frame, TPA_OFF)?,
    })
}

/// ARP request asking for `local`.
pub fn is_arp_request(frame: &[u8], local: Ipv4Addr) -> bool {
    parse(frame).is_some_and(|arp| arp.oper == ARP_OPER_REQUEST && arp.target_ip == local)
}

/// ARP reply addressed to `local`.
pub fn is_arp_response(frame: &[u8], local: Ipv4Addr) -> bool {
    parse(frame).is_some_and(|arp| arp.oper == ARP_OPER_REPLY && arp.target_ip == local)
}

fn write_body(
    frame: &mut [u8],
    oper: u16,
    sender: (MacAddr, Ipv4Addr),
    target: (MacAddr, Ipv4Addr),
) {
    let arp = &mut frame[ARP_OFF..ARP_OFF + ARP_PACKET_LEN];
    put_u16(arp, 0, ARP_HTYPE_ETHERNET);
    put_u16(arp, 2, EtherType::Ipv4.as_u16());
    arp[4] = ARP_HLEN_ETHERNET;
    arp[5] = ARP_PLEN_IPV4;
    put_u16(frame, OPER_OFF, oper);
    frame[SHA_OFF..SHA_OFF + 6].copy_from_slice(&sender.0.0);
    frame[SPA_OFF..SPA_OFF + 4].copy_from_slice(&sender.1.0);
    frame[THA_OFF..THA_OFF + 6].copy_from_slice(&target.0.0);
    frame[TPA_OFF..TPA_OFF + 4].copy_from_slice(&target.1.0);
}

/// Build a broadcast request for `target_ip` into `frame`. Returns the frame length.
pub fn write_request(
    frame: &mut [u8],
    local_mac: MacAddr,
    local_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> usize {
    ethernet::write_header(frame, MacAddr::BROADCAST, local_mac, EtherType::Arp);
    write_body(
        frame,
        ARP_OPER_REQUEST,
        (local_mac, local_ip),
        (MacAddr::ZERO, target_ip),
    );
    ARP_FRAME_LEN
}

/// Rewrite the request held in `frame` into our reply. The requester's
/// addresses are copied out before anything is overwritten.
pub fn write_response_in_place(frame: &mut [u8], local_mac: MacAddr, local_ip: Ipv4Addr) -> Option<usize> {
    let request = parse(frame)?;
    ethernet::write_header(frame, request.sender_mac, local_mac, EtherType::Arp);
    write_body(
        frame,
        ARP_OPER_REPLY,
        (local_mac, local_ip),
        (request.sender_mac, request.sender_ip),
    );
    Some(ARP_FRAME_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL_MAC: MacAddr = MacAddr([2, 3, 4, 5, 6, 0x48]);
    const LOCAL_IP: Ipv4Addr = Ipv4Addr([192, 168, 1, 72]);
    const PEER_MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0, 0, 1]);
    const PEER_IP: Ipv4Addr = Ipv4Addr([192, 168, 1, 10]);

    #[test]
    fn request_layout() {
        let mut frame = [0u8; 64];
        let len = write_request(&mut frame, LOCAL_MAC, LOCAL_IP, PEER_IP);
        assert_eq!(len, 42);
        assert_eq!(&frame[0..6], &[0xff; 6]);
        assert_eq!(&frame[12..14], &[0x08, 0x06]);
        assert_eq!(&frame[14..22], &[0, 1, 0x08, 0x00, 6, 4, 0, 1]);
        let arp = parse(&frame[..len]).expect("arp");
        assert_eq!(arp.sender_mac, LOCAL_MAC);
        assert_eq!(arp.target_mac, MacAddr::ZERO);
        assert_eq!(arp.target_ip, PEER_IP);
        assert!(is_arp_request(&frame[..len], PEER_IP));
        assert!(!is_arp_request(&frame[..len], LOCAL_IP));
    }

    #[test]
    fn response_answers_requester() {
        let mut frame = [0u8; 60];
        write_request(&mut frame, PEER_MAC, PEER_IP, LOCAL_IP);
        assert!(is_arp_request(&frame, LOCAL_IP));

        let len = write_response_in_place(&mut frame, LOCAL_MAC, LOCAL_IP).expect("reply");
        assert!(is_arp_response(&frame[..len], PEER_IP));
        let arp = parse(&frame[..len]).expect("arp");
        assert_eq!(arp.oper, ARP_OPER_REPLY);
        assert_eq!(arp.sender_mac, LOCAL_MAC);
        assert_eq!(arp.sender_ip, LOCAL_IP);
        assert_eq!(arp.target_mac, PEER_MAC);
        assert_eq!(&frame[0..6], &PEER_MAC.0);
        assert_eq!(&frame[6..12], &LOCAL_MAC.0);
    }

    #[test]
    fn non_ipv4_arp_ignored() {
        let mut frame = [0u8; 60];
        write_request(&mut frame, PEER_MAC, PEER_IP, LOCAL_IP);
        frame[ARP_OFF + 4] = 8;
        assert!(parse(&frame).is_none());
    }
}
