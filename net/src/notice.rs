//! User-visible events raised while the loop runs.
//!
//! Commands report their own errors through `Result`. Everything that goes
//! wrong (or right) later, such as a refused connection or an abandoned
//! handshake, is queued here for the shell layer to print.

use core::fmt;

use ethmq_lib::RingBuffer;
use ethmq_lib::dlog_info;

use crate::mqtt::TopicIndex;
use crate::types::{Ipv4Addr, SockAddr};

pub const NOTICE_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    Connected(SockAddr),
    ConnectionRefused(SockAddr),
    /// The peer reset an open connection; the handshake is being retried.
    ConnectionReset(SockAddr),
    ConnectionClosed(SockAddr),
    ArpTimeout(Ipv4Addr),
    HandshakeTimeout(SockAddr),
    PingReply(Ipv4Addr),
    PingTimeout(Ipv4Addr),
    MqttConnected,
    MqttRefused { code: u8 },
    MqttDisconnected,
    Subscribed(TopicIndex),
    SubscribeRejected(TopicIndex),
    Unsubscribed(TopicIndex),
    RxOverflow,
}

/// Reason text for a CONNACK return code.
pub const fn connack_reason(code: u8) -> &'static str {
    match code {
        0 => "accepted",
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown reason",
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(peer) => write!(f, "connected to {}", peer),
            Self::ConnectionRefused(peer) => write!(f, "connection refused by {}", peer),
            Self::ConnectionReset(peer) => write!(f, "connection reset by {}, reconnecting", peer),
            Self::ConnectionClosed(peer) => write!(f, "connection to {} closed", peer),
            Self::ArpTimeout(ip) => write!(f, "no ARP response from {}", ip),
            Self::HandshakeTimeout(peer) => write!(f, "no response from {}", peer),
            Self::PingReply(ip) => write!(f, "reply from {}", ip),
            Self::PingTimeout(ip) => write!(f, "ping {} timed out", ip),
            Self::MqttConnected => write!(f, "mqtt connected"),
            Self::MqttRefused { code } => {
                write!(f, "mqtt connection refused: {} ({})", connack_reason(*code), code)
            }
            Self::MqttDisconnected => write!(f, "mqtt disconnected"),
            Self::Subscribed(index) => write!(f, "subscribed (topic {})", index),
            Self::SubscribeRejected(index) => write!(f, "subscribe rejected (topic {})", index),
            Self::Unsubscribed(index) => write!(f, "unsubscribed (topic {})", index),
            Self::RxOverflow => write!(f, "receive overflow, frames lost"),
        }
    }
}

/// Bounded notice queue; the oldest notice is dropped when full.
#[derive(Default)]
pub struct Notices {
    queue: RingBuffer<Notice, NOTICE_CAPACITY>,
}

impl Notices {
    pub const fn new() -> Self {
        Self {
            queue: RingBuffer::new(),
        }
    }

    pub fn push(&mut self, notice: Notice) {
        dlog_info!("notice: {}", notice);
        self.queue.push_overwrite(notice);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Notice> {
        self.queue.try_pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
