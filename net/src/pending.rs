//! Deferred transmit requests.
//!
//! The receive path and the command API never build frames directly: they
//! raise an [`Action`] naming the session it targets, and the loop drains
//! the queue afterwards. Raising an action that is already queued is a
//! no-op, so each action behaves like a flag that is either set or clear.
//! [`PendingActions::take`] removes an action before its side effect runs.

use core::fmt;

use ethmq_lib::RingBuffer;
use ethmq_lib::dlog_warn;

use crate::socket::SocketHandle;

pub const PENDING_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    SendArpRequest(SocketHandle),
    SendSyn(SocketHandle),
    SendAck(SocketHandle),
    /// FIN|ACK answering the peer's FIN.
    SendFinAck(SocketHandle),
    /// FIN|ACK starting an active close.
    SendFin(SocketHandle),
    SendPing(SocketHandle),
    SendMqttConnect(SocketHandle),
    SendMqttPublish(SocketHandle),
    SendMqttSubscribe(SocketHandle),
    SendMqttUnsubscribe(SocketHandle),
    SendMqttDisconnect(SocketHandle),
    SendMqttPingReq(SocketHandle),
}

impl Action {
    pub const fn handle(self) -> SocketHandle {
        match self {
            Self::SendArpRequest(h)
            | Self::SendSyn(h)
            | Self::SendAck(h)
            | Self::SendFinAck(h)
            | Self::SendFin(h)
            | Self::SendPing(h)
            | Self::SendMqttConnect(h)
            | Self::SendMqttPublish(h)
            | Self::SendMqttSubscribe(h)
            | Self::SendMqttUnsubscribe(h)
            | Self::SendMqttDisconnect(h)
            | Self::SendMqttPingReq(h) => h,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::SendArpRequest(_) => "arp-request",
            Self::SendSyn(_) => "syn",
            Self::SendAck(_) => "ack",
            Self::SendFinAck(_) => "fin-ack",
            Self::SendFin(_) => "fin",
            Self::SendPing(_) => "ping",
            Self::SendMqttConnect(_) => "mqtt-connect",
            Self::SendMqttPublish(_) => "mqtt-publish",
            Self::SendMqttSubscribe(_) => "mqtt-subscribe",
            Self::SendMqttUnsubscribe(_) => "mqtt-unsubscribe",
            Self::SendMqttDisconnect(_) => "mqtt-disconnect",
            Self::SendMqttPingReq(_) => "mqtt-pingreq",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name(), self.handle())
    }
}

#[derive(Default)]
pub struct PendingActions {
    queue: RingBuffer<Action, PENDING_CAPACITY>,
}

impl PendingActions {
    pub const fn new() -> Self {
        Self {
            queue: RingBuffer::new(),
        }
    }

    /// Set the flag for `action`. Returns false only if the queue is full.
    pub fn raise(&mut self, action: Action) -> bool {
        if self.queue.contains(&action) {
            return true;
        }
        if !self.queue.try_push(action) {
            dlog_warn!("pending: queue full, dropping {}", action);
            return false;
        }
        true
    }

    /// Clear and return the oldest raised action.
    #[inline]
    pub fn take(&mut self) -> Option<Action> {
        self.queue.try_pop()
    }

    #[inline]
    pub fn is_raised(&self, action: Action) -> bool {
        self.queue.contains(&action)
    }

    /// Drop every action aimed at `handle`.
    pub fn cancel_for(&mut self, handle: SocketHandle) {
        self.queue.retain(|a| a.handle() != handle);
    }

    pub fn cancel(&mut self, action: Action) {
        self.queue.retain(|a| *a != action);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.reset();
    }
}
