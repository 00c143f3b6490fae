//! Classification of one received frame.
//!
//! Every check a frame must pass happens here, before any state changes:
//! link address, ethertype, header lengths and checksums. What comes out is
//! a self-contained [`Inbound`] value holding no borrow of the frame buffer.

use ethmq_lib::dlog_trace;

use crate::arp::{self, ARP_OPER_REPLY, ARP_OPER_REQUEST};
use crate::config::NetConfig;
use crate::ethernet;
use crate::icmp;
use crate::ipv4;
use crate::tcp::{self, TcpSegment};
use crate::types::{EtherType, IpProtocol, Ipv4Addr, MacAddr};
use crate::udp::{self, UdpDatagram};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Someone asks for our hardware address.
    ArpRequest,
    ArpReply { sender_mac: MacAddr, sender_ip: Ipv4Addr },
    PingRequest,
    PingReply { src_ip: Ipv4Addr },
    Tcp(TcpSegment),
    Udp(UdpDatagram),
    /// Well-formed, but not addressed to us or of no interest.
    NotForUs,
    /// Failed a length or checksum check.
    Malformed,
}

fn link_accepts(dst: MacAddr, config: &NetConfig) -> bool {
    dst == config.mac || dst.is_broadcast()
}

pub fn classify(frame: &[u8], config: &NetConfig) -> Inbound {
    let Some(eth) = ethernet::parse_header(frame) else {
        return Inbound::Malformed;
    };
    if !link_accepts(eth.dst, config) {
        return Inbound::NotForUs;
    }
    match eth.kind() {
        Some(EtherType::Arp) => classify_arp(frame, config),
        Some(EtherType::Ipv4) => classify_ip(frame, config),
        None => Inbound::NotForUs,
    }
}

fn classify_arp(frame: &[u8], config: &NetConfig) -> Inbound {
    let Some(packet) = arp::parse(frame) else {
        dlog_trace!("arp: malformed packet");
        return Inbound::Malformed;
    };
    if packet.target_ip != config.ip {
        return Inbound::NotForUs;
    }
    match packet.oper {
        ARP_OPER_REQUEST => Inbound::ArpRequest,
        ARP_OPER_REPLY => Inbound::ArpReply {
            sender_mac: packet.sender_mac,
            sender_ip: packet.sender_ip,
        },
        _ => Inbound::NotForUs,
    }
}

fn classify_ip(frame: &[u8], config: &NetConfig) -> Inbound {
    let Some(ip) = ipv4::parse_header(frame) else {
        dlog_trace!("ip: malformed header");
        return Inbound::Malformed;
    };
    let unicast = ip.dst == config.ip;
    let broadcast = ip.dst.is_broadcast() || ip.dst == config.broadcast();
    match ip.protocol() {
        Some(IpProtocol::Icmp) if unicast => {
            if icmp::is_ping_request(frame) {
                Inbound::PingRequest
            } else if icmp::is_ping_response(frame) {
                Inbound::PingReply { src_ip: ip.src }
            } else {
                Inbound::NotForUs
            }
        }
        Some(IpProtocol::Tcp) if unicast => match tcp::parse_segment(frame) {
            Some(seg) => Inbound::Tcp(seg),
            None => Inbound::Malformed,
        },
        Some(IpProtocol::Udp) if unicast || broadcast => match udp::parse(frame) {
            Some(dgram) => Inbound::Udp(dgram),
            None => {
                dlog_trace!("udp: malformed datagram from {}", ip.src);
                Inbound::Malformed
            }
        },
        _ => Inbound::NotForUs,
    }
}
