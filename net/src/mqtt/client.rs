//! MQTT session state machine.
//!
//! One operation is in flight at a time. Commands only queue a request; the
//! loop later asks the client to write the packet into the TCP payload area
//! of the frame buffer once the owning session can carry it.

use ethmq_lib::{dlog_debug, dlog_trace, dlog_warn};
use heapless::Vec;

use crate::config::MqttOptions;
use crate::mqtt::packet::{self, MqttError, Packet, SUBACK_FAILURE};
use crate::mqtt::topics::{TopicIndex, TopicName, TopicTable, topic_name};
use crate::netdev::Application;
use crate::notice::{Notice, Notices};
use crate::socket::SocketHandle;
use crate::types::NetError;

/// Largest message `mqtt_publish` accepts.
pub const MAX_PUBLISH_PAYLOAD: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MqttState {
    #[default]
    Disconnected,
    ConnectSent,
    Connected,
    PublishSent,
    SubscribeSent,
    UnsubscribeSent,
    DisconnectSent,
}

impl MqttState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::ConnectSent => "CONNECT_SENT",
            Self::Connected => "CONNECTED",
            Self::PublishSent => "PUBLISH_SENT",
            Self::SubscribeSent => "SUBSCRIBE_SENT",
            Self::UnsubscribeSent => "UNSUBSCRIBE_SENT",
            Self::DisconnectSent => "DISCONNECT_SENT",
        }
    }

    /// CONNACK accepted and DISCONNECT not yet sent.
    pub const fn is_connected(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::PublishSent | Self::SubscribeSent | Self::UnsubscribeSent
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Request {
    /// `fresh` is set when the topic entered the table with this request.
    Subscribe {
        topic: TopicIndex,
        packet_id: u16,
        fresh: bool,
    },
    Unsubscribe { topic: TopicIndex, packet_id: u16 },
}

/// What the caller must do after inbound broker data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MqttInput {
    Continue,
    /// CONNACK refused the session; the TCP session must be freed.
    Refused { code: u8 },
}

pub struct MqttClient {
    state: MqttState,
    socket: Option<SocketHandle>,
    /// CONNECT is owed once the TCP handshake completes.
    connect_pending: bool,
    topics: TopicTable,
    request: Option<Request>,
    outbox_topic: TopicName,
    outbox_payload: Vec<u8, MAX_PUBLISH_PAYLOAD>,
    next_packet_id: u16,
    last_tx_ms: u64,
}

impl Default for MqttClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttClient {
    pub const fn new() -> Self {
        Self {
            state: MqttState::Disconnected,
            socket: None,
            connect_pending: false,
            topics: TopicTable::new(),
            request: None,
            outbox_topic: TopicName::new(),
            outbox_payload: Vec::new(),
            next_packet_id: 1,
            last_tx_ms: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> MqttState {
        self.state
    }

    #[inline]
    pub fn socket(&self) -> Option<SocketHandle> {
        self.socket
    }

    #[inline]
    pub fn topics(&self) -> &TopicTable {
        &self.topics
    }

    #[inline]
    pub fn is_connect_pending(&self) -> bool {
        self.connect_pending
    }

    pub fn seed_packet_ids(&mut self, seed: u16) {
        self.next_packet_id = seed.max(1);
    }

    fn alloc_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
        id
    }

    fn set_state(&mut self, to: MqttState) {
        if self.state != to {
            dlog_debug!("mqtt: {} -> {}", self.state.name(), to.name());
            self.state = to;
        }
    }

    /// Bind the client to a TCP session whose handshake is under way.
    pub fn begin(&mut self, socket: SocketHandle) -> Result<(), NetError> {
        if self.socket.is_some() {
            return Err(NetError::AlreadyConnected);
        }
        self.socket = Some(socket);
        self.connect_pending = true;
        Ok(())
    }

    /// The TCP session reached ESTABLISHED. Returns true when CONNECT is owed.
    pub fn on_established(&mut self, socket: SocketHandle) -> bool {
        if self.socket != Some(socket) || !self.connect_pending {
            return false;
        }
        self.connect_pending = false;
        true
    }

    /// The TCP session was reset and is redoing its handshake. CONNECT is
    /// owed again once it completes; subscriptions do not survive.
    pub fn on_reconnect(&mut self, socket: SocketHandle) {
        if self.socket != Some(socket) {
            return;
        }
        self.set_state(MqttState::Disconnected);
        self.connect_pending = true;
        self.topics.clear();
        self.request = None;
        self.outbox_topic.clear();
        self.outbox_payload.clear();
    }

    /// Forget the session, its topics and anything queued.
    pub fn reset(&mut self) {
        if self.socket.is_some() {
            dlog_debug!("mqtt: session reset in {}", self.state.name());
        }
        self.state = MqttState::Disconnected;
        self.socket = None;
        self.connect_pending = false;
        self.topics.clear();
        self.request = None;
        self.outbox_topic.clear();
        self.outbox_payload.clear();
    }

    fn ensure_idle(&self) -> Result<(), NetError> {
        match self.state {
            MqttState::Connected => Ok(()),
            s if s.is_connected() => Err(NetError::Busy),
            _ => Err(NetError::NotConnected),
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    pub fn queue_publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), NetError> {
        self.ensure_idle()?;
        let topic = topic_name(topic)?;
        let payload = Vec::from_slice(payload).map_err(|_| NetError::MessageTooLong)?;
        self.outbox_topic = topic;
        self.outbox_payload = payload;
        self.set_state(MqttState::PublishSent);
        Ok(())
    }

    pub fn queue_subscribe(&mut self, topic: &str) -> Result<TopicIndex, NetError> {
        self.ensure_idle()?;
        let fresh = self.topics.get_topic_index(topic).is_none();
        let index = self.topics.add_topic(topic)?;
        let packet_id = self.alloc_packet_id();
        self.request = Some(Request::Subscribe {
            topic: index,
            packet_id,
            fresh,
        });
        self.set_state(MqttState::SubscribeSent);
        Ok(index)
    }

    pub fn queue_unsubscribe(&mut self, topic: &str) -> Result<TopicIndex, NetError> {
        self.ensure_idle()?;
        let index = self
            .topics
            .get_topic_index(topic)
            .ok_or(NetError::TopicNotFound)?;
        let packet_id = self.alloc_packet_id();
        self.request = Some(Request::Unsubscribe {
            topic: index,
            packet_id,
        });
        self.set_state(MqttState::UnsubscribeSent);
        Ok(index)
    }

    /// Abandons any in-flight subscribe or unsubscribe.
    pub fn queue_disconnect(&mut self) -> Result<(), NetError> {
        if !self.state.is_connected() {
            return Err(NetError::NotConnected);
        }
        self.request = None;
        self.set_state(MqttState::Connected);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Packet construction
    // -------------------------------------------------------------------------

    pub fn write_connect(
        &mut self,
        options: &MqttOptions,
        out: &mut [u8],
        now_ms: u64,
    ) -> Result<usize, MqttError> {
        let len = packet::encode_connect(&options.connect_options(), out)?;
        self.set_state(MqttState::ConnectSent);
        self.last_tx_ms = now_ms;
        Ok(len)
    }

    pub fn write_publish(&mut self, out: &mut [u8], now_ms: u64) -> Result<usize, MqttError> {
        let len = packet::encode_publish(&self.outbox_topic, &self.outbox_payload, false, out)?;
        self.outbox_topic.clear();
        self.outbox_payload.clear();
        if self.state == MqttState::PublishSent {
            self.set_state(MqttState::Connected);
        }
        self.last_tx_ms = now_ms;
        Ok(len)
    }

    pub fn write_subscribe(
        &mut self,
        options: &MqttOptions,
        out: &mut [u8],
        now_ms: u64,
    ) -> Result<usize, MqttError> {
        let Some(Request::Subscribe {
            topic, packet_id, ..
        }) = self.request
        else {
            return Err(MqttError::Malformed);
        };
        let name = self.topics.name(topic).ok_or(MqttError::Malformed)?;
        let len = packet::encode_subscribe(packet_id, &[(name, options.subscribe_qos())], out)?;
        self.last_tx_ms = now_ms;
        Ok(len)
    }

    pub fn write_unsubscribe(&mut self, out: &mut [u8], now_ms: u64) -> Result<usize, MqttError> {
        let Some(Request::Unsubscribe { topic, packet_id }) = self.request else {
            return Err(MqttError::Malformed);
        };
        let name = self.topics.name(topic).ok_or(MqttError::Malformed)?;
        let len = packet::encode_unsubscribe(packet_id, &[name], out)?;
        self.last_tx_ms = now_ms;
        Ok(len)
    }

    pub fn write_disconnect(&mut self, out: &mut [u8], now_ms: u64) -> Result<usize, MqttError> {
        let len = packet::encode_disconnect(out)?;
        self.set_state(MqttState::DisconnectSent);
        self.last_tx_ms = now_ms;
        Ok(len)
    }

    pub fn write_pingreq(&mut self, out: &mut [u8], now_ms: u64) -> Result<usize, MqttError> {
        let len = packet::encode_pingreq(out)?;
        self.last_tx_ms = now_ms;
        Ok(len)
    }

    /// No MQTT packet went out for `interval_ms` on a connected session.
    pub fn keepalive_due(&self, now_ms: u64, interval_ms: Option<u64>) -> bool {
        self.state.is_connected()
            && interval_ms.is_some_and(|i| now_ms >= self.last_tx_ms.saturating_add(i))
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Process every control packet in one in-order TCP payload.
    pub fn handle_payload(
        &mut self,
        payload: &[u8],
        app: &mut impl Application,
        notices: &mut Notices,
    ) -> MqttInput {
        for item in packet::packets(payload) {
            match item {
                Ok(pkt) => {
                    if let MqttInput::Refused { code } = self.handle_packet(pkt, app, notices) {
                        return MqttInput::Refused { code };
                    }
                }
                Err(e) => {
                    dlog_trace!("mqtt: dropping undecodable data: {:?}", e);
                }
            }
        }
        MqttInput::Continue
    }

    fn handle_packet(
        &mut self,
        pkt: Packet<'_>,
        app: &mut impl Application,
        notices: &mut Notices,
    ) -> MqttInput {
        match pkt {
            Packet::ConnAck { return_code, .. } => {
                if self.state != MqttState::ConnectSent {
                    dlog_trace!("mqtt: stray CONNACK in {}", self.state.name());
                    return MqttInput::Continue;
                }
                if return_code != 0 {
                    dlog_warn!("mqtt: CONNACK refused, code {}", return_code);
                    notices.push(Notice::MqttRefused { code: return_code });
                    return MqttInput::Refused { code: return_code };
                }
                self.set_state(MqttState::Connected);
                notices.push(Notice::MqttConnected);
            }
            Packet::SubAck {
                packet_id,
                return_codes,
            } => {
                let Some(Request::Subscribe {
                    topic,
                    packet_id: sent,
                    fresh,
                }) = self.request
                else {
                    dlog_trace!("mqtt: SUBACK with no subscribe in flight");
                    return MqttInput::Continue;
                };
                if packet_id != sent {
                    dlog_debug!("mqtt: SUBACK id {} for request {}", packet_id, sent);
                }
                self.request = None;
                self.set_state(MqttState::Connected);
                if return_codes.first() == Some(&SUBACK_FAILURE) {
                    // A rejected repeat leaves the earlier subscription active.
                    if fresh {
                        self.topics.remove_topic(topic);
                    }
                    notices.push(Notice::SubscribeRejected(topic));
                } else {
                    notices.push(Notice::Subscribed(topic));
                }
            }
            Packet::UnsubAck { packet_id } => {
                let Some(Request::Unsubscribe { topic, packet_id: sent }) = self.request else {
                    dlog_trace!("mqtt: UNSUBACK with no unsubscribe in flight");
                    return MqttInput::Continue;
                };
                if packet_id != sent {
                    dlog_debug!("mqtt: UNSUBACK id {} for request {}", packet_id, sent);
                }
                self.request = None;
                self.set_state(MqttState::Connected);
                self.topics.remove_topic(topic);
                notices.push(Notice::Unsubscribed(topic));
            }
            Packet::Publish(msg) => {
                dlog_trace!("mqtt: message on {} ({} bytes)", msg.topic, msg.payload.len());
                app.on_mqtt_message(msg.topic, msg.payload);
            }
            Packet::PingResp => dlog_trace!("mqtt: PINGRESP"),
            Packet::Other { control } => {
                dlog_trace!("mqtt: ignoring control byte {:#04x}", control);
            }
        }
        MqttInput::Continue
    }
}
