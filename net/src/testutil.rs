//! Test doubles: a loopback device, a recording application, fixed entropy,
//! and builders for frames a peer would send.

use std::collections::VecDeque;
use std::string::String;
use std::vec;
use std::vec::Vec;

use crate::arp;
use crate::config::NetConfig;
use crate::frame::FRAME_MAX;
use crate::icmp;
use crate::netdev::{Application, Entropy, NetDevice};
use crate::netstack::NetStack;
use crate::socket::SocketHandle;
use crate::tcp::{self, TCP_PAYLOAD_OFF, TcpFlags, TcpHeader};
use crate::types::{Ipv4Addr, MacAddr, Port, SockAddr};
use crate::udp;

pub const LOCAL_MAC: MacAddr = MacAddr([0x02, 0x03, 0x04, 0x05, 0x06, 0x8d]);
pub const LOCAL_IP: Ipv4Addr = Ipv4Addr([192, 168, 1, 141]);
pub const PEER_MAC: MacAddr = MacAddr([0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]);
pub const PEER_IP: Ipv4Addr = Ipv4Addr([192, 168, 1, 10]);
pub const PEER_UDP_PORT: Port = Port(5000);

/// Every call to the entropy source returns this.
pub const FIXED_RANDOM: u32 = 0x1000_0000;
pub const PEER_ISS: u32 = 0x5000_0000;

// =============================================================================
// Doubles
// =============================================================================

#[derive(Default)]
pub struct MockDevice {
    pub rx: VecDeque<Vec<u8>>,
    pub tx: Vec<Vec<u8>>,
    pub overflow: bool,
}

impl NetDevice for MockDevice {
    fn send_frame(&mut self, frame: &[u8]) {
        self.tx.push(frame.to_vec());
    }

    fn receive_frame(&mut self, buf: &mut [u8]) -> Option<usize> {
        let frame = self.rx.pop_front()?;
        buf[..frame.len()].copy_from_slice(&frame);
        Some(frame.len())
    }

    fn take_overflow(&mut self) -> bool {
        core::mem::take(&mut self.overflow)
    }
}

#[derive(Default)]
pub struct RecordingApp {
    pub messages: Vec<(String, Vec<u8>)>,
    pub tcp_data: Vec<(SocketHandle, Vec<u8>)>,
    pub udp_seen: Vec<(SockAddr, Port, Vec<u8>)>,
    /// Returned as the reply to every datagram when set.
    pub udp_reply: Option<Vec<u8>>,
}

impl Application for RecordingApp {
    fn on_mqtt_message(&mut self, topic: &str, payload: &[u8]) {
        self.messages.push((String::from(topic), payload.to_vec()));
    }

    fn on_tcp_data(&mut self, socket: SocketHandle, data: &[u8]) {
        self.tcp_data.push((socket, data.to_vec()));
    }

    fn on_udp_datagram(
        &mut self,
        src: SockAddr,
        dst_port: Port,
        payload: &[u8],
        reply: &mut [u8],
    ) -> usize {
        self.udp_seen.push((src, dst_port, payload.to_vec()));
        match &self.udp_reply {
            Some(r) => {
                reply[..r.len()].copy_from_slice(r);
                r.len()
            }
            None => 0,
        }
    }
}

pub struct FixedEntropy;

impl Entropy for FixedEntropy {
    fn random_u32(&mut self) -> u32 {
        FIXED_RANDOM
    }
}

pub type TestStack = NetStack<MockDevice, RecordingApp, FixedEntropy>;

pub fn test_config() -> NetConfig {
    let mut config = NetConfig::new(LOCAL_MAC, LOCAL_IP, Ipv4Addr::new(255, 255, 255, 0));
    config.gateway = Ipv4Addr::new(192, 168, 1, 1);
    config.mqtt_broker = PEER_IP;
    config
}

pub fn stack() -> TestStack {
    NetStack::new(
        MockDevice::default(),
        RecordingApp::default(),
        FixedEntropy,
        test_config(),
    )
}

// =============================================================================
// Peer frames
// =============================================================================

fn blank() -> Vec<u8> {
    vec![0u8; FRAME_MAX]
}

fn finish(mut frame: Vec<u8>, len: usize) -> Vec<u8> {
    frame.truncate(len);
    frame
}

pub fn arp_request_from_peer() -> Vec<u8> {
    let mut frame = blank();
    let len = arp::write_request(&mut frame, PEER_MAC, PEER_IP, LOCAL_IP);
    finish(frame, len)
}

/// The peer answering our who-has.
pub fn arp_reply_from_peer() -> Vec<u8> {
    let mut frame = blank();
    arp::write_request(&mut frame, LOCAL_MAC, LOCAL_IP, PEER_IP);
    let len = arp::write_response_in_place(&mut frame, PEER_MAC, PEER_IP).unwrap();
    finish(frame, len)
}

pub fn ping_request_from_peer() -> Vec<u8> {
    let mut frame = blank();
    let len = icmp::write_ping_request(&mut frame, (PEER_MAC, PEER_IP), (LOCAL_MAC, LOCAL_IP));
    finish(frame, len)
}

pub fn ping_reply_from_peer() -> Vec<u8> {
    let mut frame = blank();
    icmp::write_ping_request(&mut frame, (LOCAL_MAC, LOCAL_IP), (PEER_MAC, PEER_IP));
    let len = icmp::write_ping_response_in_place(&mut frame, PEER_MAC).unwrap();
    finish(frame, len)
}

pub fn udp_from_peer(dst_port: Port, payload: &[u8]) -> Vec<u8> {
    let mut frame = blank();
    let len = udp::write_datagram(
        &mut frame,
        (PEER_MAC, SockAddr::new(PEER_IP, PEER_UDP_PORT)),
        (LOCAL_MAC, SockAddr::new(LOCAL_IP, dst_port)),
        payload,
    );
    finish(frame, len)
}

/// Segment from `PEER_IP:from` to our `to` port.
pub fn segment_from_peer(
    from: Port,
    to: Port,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    payload: &[u8],
) -> Vec<u8> {
    let mut frame = blank();
    frame[TCP_PAYLOAD_OFF..TCP_PAYLOAD_OFF + payload.len()].copy_from_slice(payload);
    let len = tcp::write_segment(
        &mut frame,
        (PEER_MAC, PEER_IP),
        (LOCAL_MAC, LOCAL_IP),
        (from, to),
        seq,
        ack,
        flags,
        payload.len(),
    );
    finish(frame, len)
}

// =============================================================================
// Inspecting what we sent
// =============================================================================

/// Header and payload of a segment we transmitted.
pub fn parse_sent(frame: &[u8]) -> Option<(TcpHeader, Vec<u8>)> {
    let seg = tcp::parse_segment(frame)?;
    Some((seg.hdr, frame[seg.payload].to_vec()))
}

/// TCP segments transmitted since the last call, oldest first.
pub fn drain_segments(stack: &mut TestStack) -> Vec<(TcpHeader, Vec<u8>)> {
    stack
        .device_mut()
        .tx
        .drain(..)
        .filter_map(|f| parse_sent(&f))
        .collect()
}

/// Drive `connect` through ARP and the handshake. Leaves the session
/// ESTABLISHED with every transmitted frame drained.
pub fn establish(stack: &mut TestStack, remote_port: Port) -> SocketHandle {
    let handle = stack.connect(PEER_IP, remote_port).unwrap();
    handshake(stack, handle, remote_port);
    handle
}

/// ARP and handshake for a session already opened.
pub fn handshake(stack: &mut TestStack, handle: SocketHandle, remote_port: Port) {
    stack.poll(0);
    stack.device_mut().rx.push_back(arp_reply_from_peer());
    stack.poll(1);
    let sock = *stack.socket(handle).unwrap();
    stack.device_mut().rx.push_back(segment_from_peer(
        remote_port,
        sock.local_port,
        PEER_ISS,
        sock.iss.wrapping_add(1),
        TcpFlags::SYN | TcpFlags::ACK,
        &[],
    ));
    stack.poll(2);
    stack.device_mut().tx.clear();
}

pub fn drain_notices(stack: &mut TestStack) -> Vec<crate::notice::Notice> {
    core::iter::from_fn(|| stack.poll_notice()).collect()
}
