//! Boundary between the stack and the platform.
//!
//! The platform owns the MAC/PHY driver, the clock and the entropy source.
//! It hands them to [`crate::netstack::NetStack`] through the traits below;
//! the stack never touches hardware directly.

use core::fmt;

use crate::socket::SocketHandle;
use crate::types::{Port, SockAddr};

// =============================================================================
// NetDevice
// =============================================================================

/// Raw Ethernet frame transport.
pub trait NetDevice {
    /// Hand a complete frame to the link layer. Fire and forget.
    fn send_frame(&mut self, frame: &[u8]);

    /// Copy one pending frame into `buf`, returning its length, or `None`
    /// when nothing is waiting. Never blocks.
    fn receive_frame(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Report, and clear, a receive overflow since the last call.
    fn take_overflow(&mut self) -> bool;
}

/// Source of initial sequence numbers, local ports and MQTT packet ids.
pub trait Entropy {
    fn random_u32(&mut self) -> u32;
}

/// Consumer callbacks, invoked synchronously while a frame is dispatched.
pub trait Application {
    fn on_mqtt_message(&mut self, topic: &str, payload: &[u8]);

    /// In-order data on a raw TCP session.
    fn on_tcp_data(&mut self, socket: SocketHandle, data: &[u8]) {
        let _ = (socket, data);
    }

    /// A datagram for us. Write a reply into `reply` and return its length,
    /// or 0 to stay silent.
    fn on_udp_datagram(
        &mut self,
        src: SockAddr,
        dst_port: Port,
        payload: &[u8],
        reply: &mut [u8],
    ) -> usize {
        let _ = (src, dst_port, payload, reply);
        0
    }
}

// =============================================================================
// NetStats
// =============================================================================

/// Monotonic counters kept by the stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetStats {
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Failed a length or checksum check.
    pub rx_malformed: u64,
    /// Valid but not for us, or for no live session.
    pub rx_dropped: u64,
    pub rx_overflows: u64,
}

impl NetStats {
    pub const fn new() -> Self {
        Self {
            rx_frames: 0,
            tx_frames: 0,
            rx_bytes: 0,
            tx_bytes: 0,
            rx_malformed: 0,
            rx_dropped: 0,
            rx_overflows: 0,
        }
    }
}

impl fmt::Display for NetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx: {} frames/{} bytes, tx: {} frames/{} bytes, malformed: {}, dropped: {}, overflows: {}",
            self.rx_frames,
            self.rx_bytes,
            self.tx_frames,
            self.tx_bytes,
            self.rx_malformed,
            self.rx_dropped,
            self.rx_overflows
        )
    }
}
