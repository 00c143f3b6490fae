//! TCP client engine: header codec, checksum gate, and the per-session state
//! machine.
//!
//! The engine only ever opens connections (active open) and supports both
//! active close and peer-initiated close. There is no retransmission queue and
//! no reassembly: a segment is accepted only if it starts exactly at the next
//! expected byte, so the `seq`/`ack` bookkeeping below has to stay exact.
//!
//! This module does not touch the device. [`tcp_input`] mutates one session
//! and returns a [`TcpInputResult`] telling the caller what to transmit,
//! deliver or free.

use core::ops::Range;

use bitflags::bitflags;
use ethmq_lib::dlog_debug;
use ethmq_lib::dlog_trace;

use crate::checksum::{self, get_u16, get_u32, put_u16, put_u32};
use crate::ethernet;
use crate::ipv4::{self, IP_OFF, IPV4_HEADER_LEN, Ipv4Header};
use crate::socket::{Socket, SocketHandle};
use crate::types::{EtherType, IpProtocol, Ipv4Addr, MacAddr, Port};

// =============================================================================
// Constants
// =============================================================================

/// Header length without options; we never send options.
pub const TCP_HEADER_LEN: usize = 20;

/// Advertised receive window. Fixed, there is no flow control.
pub const DEFAULT_WINDOW_SIZE: u16 = 1522;

/// Frame offset of the payload of every segment we build.
pub const TCP_PAYLOAD_OFF: usize = IP_OFF + IPV4_HEADER_LEN + TCP_HEADER_LEN;

/// Largest payload one outbound segment can carry.
pub const TCP_MAX_PAYLOAD: usize = 1500 - IPV4_HEADER_LEN - TCP_HEADER_LEN;

bitflags! {
    /// Control bits of byte 13 of the header.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

// =============================================================================
// Header codec
// =============================================================================

/// Parsed TCP header, multi-byte fields in host order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: Port,
    pub dst_port: Port,
    pub seq_num: u32,
    pub ack_num: u32,
    /// Data offset in 32-bit words (5 to 15).
    pub data_offset: u8,
    pub flags: TcpFlags,
    pub window_size: u16,
}

impl TcpHeader {
    #[inline]
    pub const fn header_len(&self) -> usize {
        (self.data_offset as usize) * 4
    }

    #[inline]
    pub fn has(&self, flags: TcpFlags) -> bool {
        self.flags.contains(flags)
    }
}

/// Parse a header from the start of a TCP segment.
pub fn parse_header(data: &[u8]) -> Option<TcpHeader> {
    if data.len() < TCP_HEADER_LEN {
        return None;
    }
    let data_offset = data[12] >> 4;
    if data_offset < 5 || data.len() < (data_offset as usize) * 4 {
        return None;
    }
    Some(TcpHeader {
        src_port: Port(get_u16(data, 0)),
        dst_port: Port(get_u16(data, 2)),
        seq_num: get_u32(data, 4),
        ack_num: get_u32(data, 8),
        data_offset,
        flags: TcpFlags::from_bits_truncate(data[13]),
        window_size: get_u16(data, 14),
    })
}

/// Write a 20-byte header with a zero checksum into `out`.
pub fn write_header(hdr: &TcpHeader, out: &mut [u8]) -> Option<usize> {
    let out = out.get_mut(..TCP_HEADER_LEN)?;
    put_u16(out, 0, hdr.src_port.as_u16());
    put_u16(out, 2, hdr.dst_port.as_u16());
    put_u32(out, 4, hdr.seq_num);
    put_u32(out, 8, hdr.ack_num);
    out[12] = 5 << 4;
    out[13] = hdr.flags.bits();
    put_u16(out, 14, hdr.window_size);
    put_u16(out, 16, 0);
    put_u16(out, 18, 0);
    Some(TCP_HEADER_LEN)
}

// =============================================================================
// Inbound classification
// =============================================================================

/// A received segment that passed every validity check. Positions refer to
/// the frame buffer; nothing here borrows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpSegment {
    pub src_mac: MacAddr,
    pub ip: Ipv4Header,
    pub hdr: TcpHeader,
    pub payload: Range<usize>,
}

impl TcpSegment {
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Validate an IPv4/TCP frame, including the pseudo-header checksum.
pub fn parse_segment(frame: &[u8]) -> Option<TcpSegment> {
    let eth = ethernet::parse_header(frame)?;
    let ip = ipv4::parse_header(frame)?;
    if ip.protocol() != Some(IpProtocol::Tcp) {
        return None;
    }
    let range = ip.payload_range();
    let seg = &frame[range.clone()];
    let hdr = parse_header(seg)?;
    if !checksum::verify_transport(ip.src, ip.dst, IpProtocol::Tcp, seg) {
        dlog_trace!("tcp: bad checksum from {}", ip.src);
        return None;
    }
    Some(TcpSegment {
        src_mac: eth.src,
        ip,
        hdr,
        payload: range.start + hdr.header_len()..range.end,
    })
}

/// Frame holds a TCP segment whose checksum verifies. Corrupt segments never
/// reach the state machine.
#[inline]
pub fn is_tcp(frame: &[u8]) -> bool {
    parse_segment(frame).is_some()
}

/// Segment comes from the MQTT broker port.
#[inline]
pub fn is_mqtt(segment: &TcpSegment) -> bool {
    segment.hdr.src_port == Port::MQTT
}

// =============================================================================
// Outbound construction
// =============================================================================

/// Build Ethernet, IP and TCP headers around `payload_len` bytes already
/// placed at [`TCP_PAYLOAD_OFF`]. Returns the frame length.
#[allow(clippy::too_many_arguments)]
pub fn write_segment(
    frame: &mut [u8],
    local: (MacAddr, Ipv4Addr),
    remote: (MacAddr, Ipv4Addr),
    ports: (Port, Port),
    seq_num: u32,
    ack_num: u32,
    flags: TcpFlags,
    payload_len: usize,
) -> usize {
    let seg_len = TCP_HEADER_LEN + payload_len;
    ethernet::write_header(frame, remote.0, local.0, EtherType::Ipv4);
    let off = ipv4::write_header(frame, local.1, remote.1, IpProtocol::Tcp, seg_len);
    let hdr = TcpHeader {
        src_port: ports.0,
        dst_port: ports.1,
        seq_num,
        ack_num,
        data_offset: 5,
        flags,
        window_size: DEFAULT_WINDOW_SIZE,
    };
    let seg = &mut frame[off..off + seg_len];
    let _ = write_header(&hdr, seg);
    let sum = checksum::transport_checksum(local.1, remote.1, IpProtocol::Tcp, seg);
    put_u16(seg, 16, sum);
    off + seg_len
}

/// Sequence space a segment occupies: payload plus one for SYN and FIN.
#[inline]
pub fn segment_len(flags: TcpFlags, payload_len: usize) -> u32 {
    let mut len = payload_len as u32;
    if flags.contains(TcpFlags::SYN) {
        len += 1;
    }
    if flags.contains(TcpFlags::FIN) {
        len += 1;
    }
    len
}

/// Build a segment from the session's counters and advance `seq` by the
/// sequence space it consumes.
///
/// A SYN is always stamped with the initial sequence number, so resending
/// it on a handshake retry does not advance `seq` twice.
pub fn emit_segment(
    frame: &mut [u8],
    local: (MacAddr, Ipv4Addr),
    sock: &mut Socket,
    flags: TcpFlags,
    payload_len: usize,
) -> usize {
    if flags.contains(TcpFlags::SYN) {
        sock.seq = sock.iss;
    }
    let remote_mac = sock.remote_mac.unwrap_or(MacAddr::BROADCAST);
    let len = write_segment(
        frame,
        local,
        (remote_mac, sock.remote_ip),
        (sock.local_port, sock.remote_port),
        sock.seq,
        sock.ack,
        flags,
        payload_len,
    );
    sock.seq = sock.seq.wrapping_add(segment_len(flags, payload_len));
    len
}

// =============================================================================
// State machine
// =============================================================================

/// TCP session state. `Listen` and `SynReceived` exist for completeness; a
/// client-only stack never enters them. A passive close moves CLOSE_WAIT to
/// LAST_ACK once our FIN|ACK is out, and the peer's ACK then frees the slot
/// from either state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TcpState {
    #[default]
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
            Self::FinWait1 => "FIN_WAIT_1",
            Self::FinWait2 => "FIN_WAIT_2",
            Self::CloseWait => "CLOSE_WAIT",
            Self::Closing => "CLOSING",
            Self::LastAck => "LAST_ACK",
            Self::TimeWait => "TIME_WAIT",
        }
    }
}

/// What the caller must transmit after [`tcp_input`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpResponse {
    Ack,
    /// Our FIN, acknowledging the peer's (passive close).
    FinAck,
}

/// Instructions produced by processing one inbound segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TcpInputResult {
    pub response: Option<TcpResponse>,
    /// Set when the session changed state.
    pub new_state: Option<TcpState>,
    /// The payload was in order and consumed; hand it to the application.
    pub deliver: bool,
    /// RST answered our SYN.
    pub refused: bool,
    /// RST on an open connection; restart the handshake with a fresh ISN.
    pub reset: bool,
    /// The session is finished and its slot must be freed.
    pub release: bool,
    /// A retransmitted FIN arrived in TIME_WAIT; restart the close timer.
    pub restart_timer: bool,
}

/// Where an inbound segment falls relative to the next byte we expect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SegmentOrder {
    InOrder,
    /// Already acknowledged; answer with a fresh ACK only.
    Duplicate,
    /// Starts beyond the expected byte; nothing to reassemble with.
    Gap,
}

#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

fn classify_order(sock: &Socket, hdr: &TcpHeader) -> SegmentOrder {
    if hdr.seq_num == sock.ack {
        SegmentOrder::InOrder
    } else if seq_lt(hdr.seq_num, sock.ack) {
        SegmentOrder::Duplicate
    } else {
        SegmentOrder::Gap
    }
}

fn transition(sock: &mut Socket, handle: SocketHandle, to: TcpState, result: &mut TcpInputResult) {
    dlog_debug!("tcp: {} -> {} {}", sock.state.name(), to.name(), handle);
    sock.state = to;
    result.new_state = Some(to);
}

/// Process one validated segment against the session it was demultiplexed to.
pub fn tcp_input(
    sock: &mut Socket,
    handle: SocketHandle,
    hdr: &TcpHeader,
    payload_len: usize,
) -> TcpInputResult {
    match sock.state {
        TcpState::SynSent => process_syn_sent(sock, handle, hdr),
        TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2 => {
            process_receiving(sock, handle, hdr, payload_len)
        }
        TcpState::CloseWait | TcpState::LastAck | TcpState::Closing => {
            process_fin_sent(sock, handle, hdr)
        }
        TcpState::TimeWait => process_time_wait(sock, handle, hdr),
        TcpState::Closed | TcpState::Listen | TcpState::SynReceived => {
            dlog_trace!("tcp: segment for idle session {}", handle);
            TcpInputResult::default()
        }
    }
}

/// SYN_SENT: waiting for SYN|ACK acknowledging our SYN.
fn process_syn_sent(sock: &mut Socket, handle: SocketHandle, hdr: &TcpHeader) -> TcpInputResult {
    let mut result = TcpInputResult::default();

    if hdr.has(TcpFlags::RST) {
        if hdr.has(TcpFlags::ACK) {
            dlog_debug!("tcp: SYN_SENT {} refused by {}", handle, sock.remote_ip);
            transition(sock, handle, TcpState::Closed, &mut result);
            result.refused = true;
            result.release = true;
        }
        return result;
    }

    if !hdr.has(TcpFlags::SYN | TcpFlags::ACK) {
        return result;
    }
    if hdr.ack_num != sock.iss.wrapping_add(1) {
        dlog_debug!(
            "tcp: SYN_SENT {} ignoring SYN|ACK acking {} (expected {})",
            handle,
            hdr.ack_num,
            sock.iss.wrapping_add(1)
        );
        return result;
    }

    sock.seq = hdr.ack_num;
    sock.ack = hdr.seq_num.wrapping_add(1);
    transition(sock, handle, TcpState::Established, &mut result);
    result.response = Some(TcpResponse::Ack);
    result
}

/// ESTABLISHED, FIN_WAIT_1 and FIN_WAIT_2: data, FIN, and the ACK of our FIN.
fn process_receiving(
    sock: &mut Socket,
    handle: SocketHandle,
    hdr: &TcpHeader,
    payload_len: usize,
) -> TcpInputResult {
    let mut result = TcpInputResult::default();
    let state = sock.state;

    if hdr.has(TcpFlags::RST) {
        if state == TcpState::Established {
            dlog_debug!("tcp: ESTABLISHED {} reset by peer, reconnecting", handle);
            transition(sock, handle, TcpState::SynSent, &mut result);
            result.reset = true;
        } else {
            transition(sock, handle, TcpState::Closed, &mut result);
            result.release = true;
        }
        return result;
    }

    // Retransmitted SYN|ACK: our handshake ACK was lost.
    if hdr.has(TcpFlags::SYN) {
        if seq_lt(hdr.seq_num, sock.ack) {
            dlog_trace!("tcp: repeated SYN on {}, re-acking", handle);
            result.response = Some(TcpResponse::Ack);
        }
        return result;
    }

    let fin = hdr.has(TcpFlags::FIN);
    if payload_len == 0 && !fin {
        if state == TcpState::FinWait1 && hdr.has(TcpFlags::ACK) && hdr.ack_num == sock.seq {
            transition(sock, handle, TcpState::FinWait2, &mut result);
        }
        return result;
    }

    match classify_order(sock, hdr) {
        SegmentOrder::InOrder => {}
        SegmentOrder::Duplicate => {
            dlog_trace!("tcp: duplicate seq={} on {}, re-acking", hdr.seq_num, handle);
            result.response = Some(TcpResponse::Ack);
            return result;
        }
        SegmentOrder::Gap => {
            dlog_trace!(
                "tcp: gap seq={} expected={} on {}, dropping",
                hdr.seq_num,
                sock.ack,
                handle
            );
            result.response = Some(TcpResponse::Ack);
            return result;
        }
    }

    if payload_len > 0 {
        sock.ack = hdr.seq_num.wrapping_add(payload_len as u32);
        result.deliver = true;
    }
    result.response = Some(TcpResponse::Ack);

    let our_fin_acked =
        state == TcpState::FinWait1 && hdr.has(TcpFlags::ACK) && hdr.ack_num == sock.seq;

    if !fin {
        if our_fin_acked {
            transition(sock, handle, TcpState::FinWait2, &mut result);
        }
        return result;
    }

    // FIN occupies one sequence number after the payload.
    sock.ack = sock.ack.wrapping_add(1);
    match state {
        TcpState::Established => {
            transition(sock, handle, TcpState::CloseWait, &mut result);
            result.response = Some(TcpResponse::FinAck);
        }
        TcpState::FinWait1 if our_fin_acked => {
            transition(sock, handle, TcpState::TimeWait, &mut result);
        }
        TcpState::FinWait1 => {
            transition(sock, handle, TcpState::Closing, &mut result);
        }
        _ => {
            transition(sock, handle, TcpState::TimeWait, &mut result);
        }
    }
    result
}

/// CLOSE_WAIT, LAST_ACK and CLOSING: our FIN is out, waiting for its ACK.
fn process_fin_sent(sock: &mut Socket, handle: SocketHandle, hdr: &TcpHeader) -> TcpInputResult {
    let mut result = TcpInputResult::default();

    if hdr.has(TcpFlags::RST) {
        transition(sock, handle, TcpState::Closed, &mut result);
        result.release = true;
        return result;
    }
    if !hdr.has(TcpFlags::ACK) || hdr.ack_num != sock.seq {
        return result;
    }
    if sock.state == TcpState::Closing {
        transition(sock, handle, TcpState::TimeWait, &mut result);
    } else {
        transition(sock, handle, TcpState::Closed, &mut result);
        result.release = true;
    }
    result
}

/// TIME_WAIT: re-acknowledge a retransmitted FIN.
fn process_time_wait(sock: &mut Socket, handle: SocketHandle, hdr: &TcpHeader) -> TcpInputResult {
    let mut result = TcpInputResult::default();
    if hdr.has(TcpFlags::RST) {
        transition(sock, handle, TcpState::Closed, &mut result);
        result.release = true;
    } else if hdr.has(TcpFlags::FIN) {
        dlog_trace!("tcp: TIME_WAIT {} retransmitted FIN", handle);
        result.response = Some(TcpResponse::Ack);
        result.restart_timer = true;
    }
    result
}
