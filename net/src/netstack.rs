//! The stack: one owned value holding every table, driven by [`NetStack::poll`].
//!
//! # Loop
//!
//! Each call to `poll` does three things, in order:
//!
//! 1. Receive at most one frame, classify it and react. ARP and ping requests
//!    are answered in place in the frame buffer; everything else raises
//!    [`Action`]s.
//! 2. Drain the raised actions, building each outbound frame in the same
//!    buffer. Anything needed from the received frame has been copied out by
//!    then.
//! 3. Check every session deadline and hand the expired ones to the
//!    supervisor, then queue an MQTT PINGREQ if the keep-alive is due.
//!
//! Nothing blocks. Waiting for a response means returning and seeing the
//! answer, or a deadline, on a later call.

use core::fmt;

use ethmq_lib::{dlog_debug, dlog_info, dlog_trace, dlog_warn};
use heapless::Vec;

use crate::arp;
use crate::config::{MqttOptions, NetConfig};
use crate::frame::FrameBuf;
use crate::icmp;
use crate::ingress::{self, Inbound};
use crate::mqtt::{MqttClient, MqttInput, MqttState, TopicIndex};
use crate::netdev::{Application, Entropy, NetDevice, NetStats};
use crate::notice::{Notice, Notices};
use crate::pending::{Action, PendingActions};
use crate::random::Lfsr64;
use crate::socket::{MAX_SOCKETS, Socket, SocketHandle, SocketTable};
use crate::tcp::{self, TCP_MAX_PAYLOAD, TCP_PAYLOAD_OFF, TcpFlags, TcpResponse, TcpSegment, TcpState};
use crate::timer::{self, FiredTimer, TimerKind, TimerOutcome};
use crate::types::{IpProtocol, Ipv4Addr, MacAddr, NetError, Port, SockAddr};
use crate::udp::{self, UdpDatagram};

/// Largest UDP reply the application may write.
pub const UDP_REPLY_MAX: usize = 512;

pub struct NetStack<D: NetDevice, A: Application, R: Entropy = Lfsr64> {
    device: D,
    app: A,
    rng: R,
    config: NetConfig,
    mqtt_options: MqttOptions,
    frame: FrameBuf,
    sockets: SocketTable,
    pending: PendingActions,
    notices: Notices,
    mqtt: MqttClient,
    stats: NetStats,
    now_ms: u64,
}

impl<D: NetDevice, A: Application, R: Entropy> NetStack<D, A, R> {
    pub fn new(device: D, app: A, mut rng: R, config: NetConfig) -> Self {
        let mut mqtt = MqttClient::new();
        mqtt.seed_packet_ids(rng.random_u32() as u16);
        dlog_info!("net: up, ip={}/{} hw={}", config.ip, config.prefix_len(), config.mac);
        Self {
            device,
            app,
            rng,
            config,
            mqtt_options: MqttOptions::default(),
            frame: FrameBuf::new(),
            sockets: SocketTable::new(),
            pending: PendingActions::new(),
            notices: Notices::new(),
            mqtt,
            stats: NetStats::new(),
            now_ms: 0,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: NetConfig) {
        dlog_info!("net: reconfigured, ip={}/{}", config.ip, config.prefix_len());
        self.config = config;
    }

    #[inline]
    pub fn mqtt_options(&self) -> &MqttOptions {
        &self.mqtt_options
    }

    #[inline]
    pub fn mqtt_options_mut(&mut self) -> &mut MqttOptions {
        &mut self.mqtt_options
    }

    #[inline]
    pub fn mqtt_state(&self) -> MqttState {
        self.mqtt.state()
    }

    #[inline]
    pub fn mqtt(&self) -> &MqttClient {
        &self.mqtt
    }

    #[inline]
    pub fn stats(&self) -> NetStats {
        self.stats
    }

    #[inline]
    pub fn socket(&self, handle: SocketHandle) -> Option<&Socket> {
        self.sockets.get(handle)
    }

    #[inline]
    pub fn sockets(&self) -> &SocketTable {
        &self.sockets
    }

    #[inline]
    pub fn pending(&self) -> &PendingActions {
        &self.pending
    }

    #[inline]
    pub fn poll_notice(&mut self) -> Option<Notice> {
        self.notices.pop()
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[inline]
    pub fn app(&self) -> &A {
        &self.app
    }

    #[inline]
    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn status(&self) -> StatusSnapshot {
        let mut sessions = Vec::new();
        for (handle, sock) in self.sockets.iter() {
            // One entry per slot; capacity matches the table.
            let _ = sessions.push(SessionStatus {
                handle,
                protocol: sock.protocol,
                local_port: sock.local_port,
                remote: sock.remote(),
                state: sock.state,
            });
        }
        StatusSnapshot {
            config: self.config,
            mqtt_state: self.mqtt.state(),
            mqtt_topics: self.mqtt.topics().len(),
            sessions,
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn open_session(&mut self, protocol: IpProtocol, remote: SockAddr) -> Result<SocketHandle, NetError> {
        if remote.ip.is_unspecified() || remote.ip.is_broadcast() || remote.ip == self.config.ip {
            return Err(NetError::InvalidArgument);
        }
        let seed = self.rng.random_u32() as u16;
        let handle = self.sockets.open(protocol, remote, seed)?;
        if protocol == IpProtocol::Tcp {
            let iss = self.rng.random_u32();
            if let Some(sock) = self.sockets.get_mut(handle) {
                sock.restart_handshake(iss);
            }
        }
        self.pending.raise(Action::SendArpRequest(handle));
        Ok(handle)
    }

    /// Open a TCP client session. The handshake starts once ARP resolves.
    pub fn connect(&mut self, ip: Ipv4Addr, port: Port) -> Result<SocketHandle, NetError> {
        if port.as_u16() == 0 {
            return Err(NetError::InvalidArgument);
        }
        self.open_session(IpProtocol::Tcp, SockAddr::new(ip, port))
    }

    /// Start an active close.
    pub fn close(&mut self, handle: SocketHandle) -> Result<(), NetError> {
        let sock = self.sockets.get(handle).ok_or(NetError::NotConnected)?;
        match sock.state {
            TcpState::Established => {
                self.pending.raise(Action::SendFin(handle));
                Ok(())
            }
            TcpState::CloseWait => {
                self.pending.raise(Action::SendFinAck(handle));
                Ok(())
            }
            TcpState::SynSent | TcpState::Closed => {
                let remote = sock.remote();
                self.release_socket(handle);
                self.notices.push(Notice::ConnectionClosed(remote));
                Ok(())
            }
            _ => Err(NetError::InvalidState),
        }
    }

    /// Send one echo request; the outcome arrives as a notice.
    pub fn ping(&mut self, ip: Ipv4Addr) -> Result<SocketHandle, NetError> {
        self.open_session(IpProtocol::Icmp, SockAddr::new(ip, Port(0)))
    }

    pub fn mqtt_connect(&mut self) -> Result<SocketHandle, NetError> {
        if self.mqtt.socket().is_some() {
            return Err(NetError::AlreadyConnected);
        }
        let broker = self.config.mqtt_broker;
        if broker.is_unspecified() {
            return Err(NetError::AddressNotAvailable);
        }
        let handle = self.connect(broker, Port::MQTT)?;
        self.mqtt.begin(handle)?;
        Ok(handle)
    }

    fn mqtt_socket(&self) -> Result<SocketHandle, NetError> {
        self.mqtt.socket().ok_or(NetError::NotConnected)
    }

    pub fn mqtt_publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), NetError> {
        let handle = self.mqtt_socket()?;
        self.mqtt.queue_publish(topic, payload)?;
        self.pending.raise(Action::SendMqttPublish(handle));
        Ok(())
    }

    pub fn mqtt_subscribe(&mut self, topic: &str) -> Result<TopicIndex, NetError> {
        let handle = self.mqtt_socket()?;
        let index = self.mqtt.queue_subscribe(topic)?;
        self.pending.raise(Action::SendMqttSubscribe(handle));
        Ok(index)
    }

    pub fn mqtt_unsubscribe(&mut self, topic: &str) -> Result<TopicIndex, NetError> {
        let handle = self.mqtt_socket()?;
        let index = self.mqtt.queue_unsubscribe(topic)?;
        self.pending.raise(Action::SendMqttUnsubscribe(handle));
        Ok(index)
    }

    /// Send DISCONNECT, then close the TCP session.
    pub fn mqtt_disconnect(&mut self) -> Result<(), NetError> {
        let handle = self.mqtt_socket()?;
        self.mqtt.queue_disconnect()?;
        self.pending.cancel(Action::SendMqttSubscribe(handle));
        self.pending.cancel(Action::SendMqttUnsubscribe(handle));
        self.pending.raise(Action::SendMqttDisconnect(handle));
        Ok(())
    }

    // =========================================================================
    // Loop
    // =========================================================================

    /// Run one iteration of the loop at time `now_ms`.
    pub fn poll(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        if self.device.take_overflow() {
            self.stats.rx_overflows += 1;
            self.notices.push(Notice::RxOverflow);
        }
        self.receive();
        self.drain_pending();
        self.run_timers();
    }

    fn transmit(&mut self, len: usize) {
        self.frame.set_len(len);
        self.device.send_frame(self.frame.as_slice());
        self.stats.tx_frames += 1;
        self.stats.tx_bytes += len as u64;
    }

    fn release_socket(&mut self, handle: SocketHandle) {
        self.sockets.release(handle);
        self.pending.cancel_for(handle);
        self.session_gone(handle);
    }

    /// Drop MQTT state riding on a session that no longer exists.
    fn session_gone(&mut self, handle: SocketHandle) {
        if self.mqtt.socket() != Some(handle) {
            return;
        }
        let state = self.mqtt.state();
        if state.is_connected() || state == MqttState::DisconnectSent {
            self.notices.push(Notice::MqttDisconnected);
        }
        self.mqtt.reset();
    }

    // -------------------------------------------------------------------------
    // Receive
    // -------------------------------------------------------------------------

    fn receive(&mut self) {
        let Some(len) = self.device.receive_frame(self.frame.storage_mut()) else {
            return;
        };
        self.frame.set_len(len);
        self.stats.rx_frames += 1;
        self.stats.rx_bytes += len as u64;

        match ingress::classify(self.frame.as_slice(), &self.config) {
            Inbound::ArpRequest => {
                let (mac, ip) = (self.config.mac, self.config.ip);
                if let Some(n) = arp::write_response_in_place(self.frame.storage_mut(), mac, ip) {
                    self.transmit(n);
                }
            }
            Inbound::ArpReply {
                sender_mac,
                sender_ip,
            } => self.on_arp_reply(sender_mac, sender_ip),
            Inbound::PingRequest => {
                let mac = self.config.mac;
                if let Some(n) = icmp::write_ping_response_in_place(self.frame.storage_mut(), mac) {
                    self.transmit(n);
                }
            }
            Inbound::PingReply { src_ip } => self.on_ping_reply(src_ip),
            Inbound::Tcp(seg) => self.on_tcp(seg),
            Inbound::Udp(dgram) => self.on_udp(dgram),
            Inbound::NotForUs => self.stats.rx_dropped += 1,
            Inbound::Malformed => self.stats.rx_malformed += 1,
        }
    }

    fn on_arp_reply(&mut self, sender_mac: MacAddr, sender_ip: Ipv4Addr) {
        let waiting: Vec<SocketHandle, MAX_SOCKETS> = self
            .sockets
            .iter()
            .filter(|(_, s)| s.remote_ip == sender_ip && !s.is_resolved())
            .map(|(h, _)| h)
            .collect();
        if waiting.is_empty() {
            dlog_trace!("arp: unsolicited reply from {}", sender_ip);
            return;
        }
        for handle in waiting {
            let Some(sock) = self.sockets.get_mut(handle) else {
                continue;
            };
            sock.remote_mac = Some(sender_mac);
            timer::stop(sock);
            dlog_debug!("arp: {} is at {} ({})", sender_ip, sender_mac, handle);
            let next = match sock.protocol {
                IpProtocol::Icmp => Action::SendPing(handle),
                _ => Action::SendSyn(handle),
            };
            self.pending.raise(next);
        }
    }

    fn on_ping_reply(&mut self, src_ip: Ipv4Addr) {
        match self.sockets.find_by_remote_ip(IpProtocol::Icmp, src_ip) {
            Some(handle) => {
                self.release_socket(handle);
                self.notices.push(Notice::PingReply(src_ip));
            }
            None => {
                dlog_trace!("icmp: unsolicited echo reply from {}", src_ip);
                self.stats.rx_dropped += 1;
            }
        }
    }

    fn on_udp(&mut self, dgram: UdpDatagram) {
        let mut reply = [0u8; UDP_REPLY_MAX];
        let n = self.app.on_udp_datagram(
            dgram.src,
            dgram.dst.port,
            &self.frame.as_slice()[dgram.payload.clone()],
            &mut reply,
        );
        if n == 0 {
            return;
        }
        let local = (self.config.mac, SockAddr::new(self.config.ip, dgram.dst.port));
        let remote = (dgram.src_mac, dgram.src);
        let len = udp::write_datagram(self.frame.storage_mut(), local, remote, &reply[..n.min(UDP_REPLY_MAX)]);
        self.transmit(len);
    }

    fn on_tcp(&mut self, seg: TcpSegment) {
        let remote = SockAddr::new(seg.ip.src, seg.hdr.src_port);
        let Some(handle) = self.sockets.lookup_tcp(seg.hdr.dst_port, remote) else {
            dlog_trace!("tcp: no session for {} -> port {}", remote, seg.hdr.dst_port);
            self.stats.rx_dropped += 1;
            return;
        };
        let Some(sock) = self.sockets.get_mut(handle) else {
            return;
        };
        let prev = sock.state;
        let result = tcp::tcp_input(sock, handle, &seg.hdr, seg.payload_len());

        if result.deliver {
            let data = &self.frame.as_slice()[seg.payload.clone()];
            if self.mqtt.socket() == Some(handle) && tcp::is_mqtt(&seg) {
                if let MqttInput::Refused { .. } =
                    self.mqtt.handle_payload(data, &mut self.app, &mut self.notices)
                {
                    self.release_socket(handle);
                    return;
                }
            } else {
                self.app.on_tcp_data(handle, data);
            }
        }

        if result.refused {
            self.release_socket(handle);
            self.notices.push(Notice::ConnectionRefused(remote));
            return;
        }
        if result.reset {
            self.restart_session(handle, remote);
            return;
        }
        if result.release {
            self.release_socket(handle);
            self.notices.push(Notice::ConnectionClosed(remote));
            return;
        }

        match result.new_state {
            Some(TcpState::Established) if prev == TcpState::SynSent => {
                if let Some(sock) = self.sockets.get_mut(handle) {
                    timer::stop(sock);
                }
                self.notices.push(Notice::Connected(remote));
                if self.mqtt.on_established(handle) {
                    self.pending.raise(Action::SendMqttConnect(handle));
                }
            }
            Some(TcpState::TimeWait) => self.arm(handle, TimerKind::TimeWait),
            _ => {}
        }
        if result.restart_timer {
            self.arm(handle, TimerKind::TimeWait);
        }

        match result.response {
            Some(TcpResponse::Ack) => {
                self.pending.raise(Action::SendAck(handle));
            }
            Some(TcpResponse::FinAck) => {
                self.pending.raise(Action::SendFinAck(handle));
            }
            None => {}
        }
    }

    /// Peer reset an open connection: new ISN, handshake again.
    fn restart_session(&mut self, handle: SocketHandle, remote: SockAddr) {
        let iss = self.rng.random_u32();
        let Some(sock) = self.sockets.get_mut(handle) else {
            return;
        };
        sock.restart_handshake(iss);
        self.pending.cancel_for(handle);
        self.mqtt.on_reconnect(handle);
        self.notices.push(Notice::ConnectionReset(remote));
        self.pending.raise(Action::SendSyn(handle));
    }

    fn arm(&mut self, handle: SocketHandle, kind: TimerKind) {
        let now = self.now_ms;
        if let Some(sock) = self.sockets.get_mut(handle) {
            timer::arm(sock, kind, now);
        }
    }

    // -------------------------------------------------------------------------
    // Transmit
    // -------------------------------------------------------------------------

    fn drain_pending(&mut self) {
        while let Some(action) = self.pending.take() {
            if !self.sockets.is_live(action.handle()) {
                dlog_trace!("pending: {} for a freed slot", action);
                continue;
            }
            self.perform(action);
        }
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::SendArpRequest(h) => self.send_arp_request(h),
            Action::SendSyn(h) => self.send_syn(h),
            Action::SendAck(h) => {
                if self.sockets.get(h).is_some_and(|s| s.state != TcpState::Closed) {
                    self.send_segment(h, TcpFlags::ACK, 0);
                }
            }
            Action::SendFinAck(h) => self.send_close(h, TcpState::CloseWait, TcpState::LastAck),
            Action::SendFin(h) => self.send_close(h, TcpState::Established, TcpState::FinWait1),
            Action::SendPing(h) => self.send_ping(h),
            Action::SendMqttConnect(_)
            | Action::SendMqttPublish(_)
            | Action::SendMqttSubscribe(_)
            | Action::SendMqttUnsubscribe(_)
            | Action::SendMqttDisconnect(_)
            | Action::SendMqttPingReq(_) => self.send_mqtt(action),
        }
    }

    fn send_arp_request(&mut self, handle: SocketHandle) {
        let Some(sock) = self.sockets.get(handle) else {
            return;
        };
        if sock.is_resolved() {
            return;
        }
        let target = sock.remote_ip;
        let len = arp::write_request(self.frame.storage_mut(), self.config.mac, self.config.ip, target);
        self.arm(handle, TimerKind::ArpResponse);
        dlog_trace!("arp: who-has {} ({})", target, handle);
        self.transmit(len);
    }

    fn send_syn(&mut self, handle: SocketHandle) {
        let ready = self
            .sockets
            .get(handle)
            .is_some_and(|s| s.state == TcpState::SynSent && s.is_resolved());
        if !ready {
            return;
        }
        self.send_segment(handle, TcpFlags::SYN, 0);
        self.arm(handle, TimerKind::Handshake);
    }

    fn send_close(&mut self, handle: SocketHandle, from: TcpState, to: TcpState) {
        let Some(sock) = self.sockets.get(handle) else {
            return;
        };
        if sock.state != from {
            dlog_trace!("tcp: no FIN from {} on {}", sock.state.name(), handle);
            return;
        }
        self.send_segment(handle, TcpFlags::FIN | TcpFlags::ACK, 0);
        if let Some(sock) = self.sockets.get_mut(handle) {
            dlog_debug!("tcp: {} -> {} {}", from.name(), to.name(), handle);
            sock.state = to;
        }
    }

    fn send_ping(&mut self, handle: SocketHandle) {
        let Some(sock) = self.sockets.get(handle) else {
            return;
        };
        let Some(remote_mac) = sock.remote_mac else {
            return;
        };
        let remote = (remote_mac, sock.remote_ip);
        let local = (self.config.mac, self.config.ip);
        let len = icmp::write_ping_request(self.frame.storage_mut(), local, remote);
        self.arm(handle, TimerKind::PingReply);
        self.transmit(len);
    }

    /// Build a segment from the session counters, `payload_len` bytes of
    /// which already sit at [`TCP_PAYLOAD_OFF`].
    fn send_segment(&mut self, handle: SocketHandle, flags: TcpFlags, payload_len: usize) {
        let local = (self.config.mac, self.config.ip);
        let Some(sock) = self.sockets.get_mut(handle) else {
            return;
        };
        let len = tcp::emit_segment(self.frame.storage_mut(), local, sock, flags, payload_len);
        self.transmit(len);
    }

    fn send_mqtt(&mut self, action: Action) {
        let handle = action.handle();
        let established = self
            .sockets
            .get(handle)
            .is_some_and(|s| s.state == TcpState::Established);
        if !established || self.mqtt.socket() != Some(handle) {
            dlog_debug!("mqtt: dropping {}, session not established", action);
            return;
        }

        let now = self.now_ms;
        let out = &mut self.frame.storage_mut()[TCP_PAYLOAD_OFF..TCP_PAYLOAD_OFF + TCP_MAX_PAYLOAD];
        let written = match action {
            Action::SendMqttConnect(_) => self.mqtt.write_connect(&self.mqtt_options, out, now),
            Action::SendMqttPublish(_) => self.mqtt.write_publish(out, now),
            Action::SendMqttSubscribe(_) => self.mqtt.write_subscribe(&self.mqtt_options, out, now),
            Action::SendMqttUnsubscribe(_) => self.mqtt.write_unsubscribe(out, now),
            Action::SendMqttDisconnect(_) => self.mqtt.write_disconnect(out, now),
            Action::SendMqttPingReq(_) => self.mqtt.write_pingreq(out, now),
            _ => return,
        };
        match written {
            Ok(n) => {
                self.send_segment(handle, TcpFlags::PSH | TcpFlags::ACK, n);
                if let Action::SendMqttDisconnect(_) = action {
                    self.pending.raise(Action::SendFin(handle));
                }
            }
            Err(e) => dlog_warn!("mqtt: cannot build {}: {:?}", action, e),
        }
    }

    // -------------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------------

    fn run_timers(&mut self) {
        let now = self.now_ms;
        for fired in timer::collect_expired(&self.sockets, now) {
            self.on_timer(fired, now);
        }

        if let Some(handle) = self.mqtt.socket()
            && self.mqtt.keepalive_due(now, self.mqtt_options.ping_interval_ms())
        {
            self.pending.raise(Action::SendMqttPingReq(handle));
        }
    }

    fn on_timer(&mut self, fired: FiredTimer, now: u64) {
        let Some(remote) = self.sockets.get(fired.handle).map(Socket::remote) else {
            return;
        };
        let outcome = timer::supervise(&mut self.sockets, &mut self.pending, fired, now);
        let notice = match (outcome, fired.kind) {
            (TimerOutcome::Satisfied | TimerOutcome::Retried { .. }, _) => return,
            (_, TimerKind::ArpResponse) => Notice::ArpTimeout(remote.ip),
            (_, TimerKind::Handshake) => Notice::HandshakeTimeout(remote),
            (_, TimerKind::TimeWait) => Notice::ConnectionClosed(remote),
            (_, TimerKind::PingReply) => Notice::PingTimeout(remote.ip),
        };
        self.session_gone(fired.handle);
        self.notices.push(notice);
    }
}

// =============================================================================
// Status
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub handle: SocketHandle,
    pub protocol: IpProtocol,
    pub local_port: Port,
    pub remote: SockAddr,
    pub state: TcpState,
}

/// Point-in-time view for the shell's status command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub config: NetConfig,
    pub mqtt_state: MqttState,
    pub mqtt_topics: usize,
    pub sessions: Vec<SessionStatus, MAX_SOCKETS>,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.config)?;
        writeln!(
            f,
            "  MQTT STATE: {} ({} topics)",
            self.mqtt_state.name(),
            self.mqtt_topics
        )?;
        if self.sessions.is_empty() {
            return write!(f, "  TCP STATE:  {}", TcpState::Closed.name());
        }
        for (i, s) in self.sessions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "  {} {} :{} -> {} {}",
                s.handle,
                s.protocol,
                s.local_port,
                s.remote,
                s.state.name()
            )?;
        }
        Ok(())
    }
}
