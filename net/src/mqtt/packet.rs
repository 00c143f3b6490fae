//! MQTT 3.1.1 control packet codec.
//!
//! Every packet is `[control byte][remaining length][variable header][payload]`.
//! The remaining length uses 7 bits per byte with 0x80 as the continuation
//! bit, at most four bytes. Encoders write straight into the caller's buffer
//! (normally the TCP payload area of the frame buffer) and return the number
//! of bytes written; decoders borrow from the received segment.

use bitflags::bitflags;

use crate::checksum::get_u16;

// =============================================================================
// Constants
// =============================================================================

pub const CONNECT: u8 = 0x10;
pub const CONNACK: u8 = 0x20;
pub const PUBLISH: u8 = 0x30;
pub const SUBSCRIBE: u8 = 0x80;
pub const SUBACK: u8 = 0x90;
pub const UNSUBSCRIBE: u8 = 0xA0;
pub const UNSUBACK: u8 = 0xB0;
pub const PINGREQ: u8 = 0xC0;
pub const PINGRESP: u8 = 0xD0;
pub const DISCONNECT: u8 = 0xE0;

/// SUBSCRIBE and UNSUBSCRIBE must carry flag bits 0b0010.
const RESERVED_FLAGS_0010: u8 = 0x02;

pub const PROTOCOL_NAME: &[u8] = b"MQTT";
pub const PROTOCOL_LEVEL: u8 = 4;

/// Variable header of CONNECT: name length (2) + "MQTT" + level + flags + keep-alive.
pub const CONNECT_VARIABLE_HEADER_LEN: usize = 10;

pub const MAX_REMAINING_LENGTH_BYTES: usize = 4;
/// Largest value four length bytes can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// SUBACK return code for a rejected topic filter.
pub const SUBACK_FAILURE: u8 = 0x80;

bitflags! {
    /// Flag byte of the CONNECT variable header.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ConnectFlags: u8 {
        const CLEAN_SESSION = 0x02;
        const WILL = 0x04;
        const WILL_QOS_1 = 0x08;
        const WILL_QOS_2 = 0x10;
        const WILL_RETAIN = 0x20;
        const PASSWORD = 0x40;
        const USERNAME = 0x80;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub const fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MqttError {
    /// The buffer ends before the packet does.
    Truncated,
    /// Lengths or flags contradict the packet layout.
    Malformed,
    /// Output buffer too small for the encoded packet.
    BufferTooSmall,
    /// A field exceeds what the wire format can express.
    TooLong,
}

// =============================================================================
// Remaining length
// =============================================================================

/// Bytes needed to encode `len`.
pub const fn remaining_length_size(len: usize) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Encode `len` into `out`, returning the number of bytes used.
pub fn encode_remaining_length(mut len: usize, out: &mut [u8]) -> Result<usize, MqttError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(MqttError::TooLong);
    }
    let mut i = 0;
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        *out.get_mut(i).ok_or(MqttError::BufferTooSmall)? = byte;
        i += 1;
        if len == 0 {
            return Ok(i);
        }
    }
}

/// Decode a remaining length from the start of `buf`, returning
/// `(value, bytes consumed)`. Never reads past the fourth byte.
pub fn decode_remaining_length(buf: &[u8]) -> Result<(usize, usize), MqttError> {
    let mut value = 0usize;
    for (i, &byte) in buf.iter().take(MAX_REMAINING_LENGTH_BYTES).enumerate() {
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if buf.len() < MAX_REMAINING_LENGTH_BYTES {
        Err(MqttError::Truncated)
    } else {
        Err(MqttError::Malformed)
    }
}

// =============================================================================
// Encoding
// =============================================================================

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put_u8(&mut self, val: u8) -> Result<(), MqttError> {
        *self.buf.get_mut(self.pos).ok_or(MqttError::BufferTooSmall)? = val;
        self.pos += 1;
        Ok(())
    }

    fn put_u16(&mut self, val: u16) -> Result<(), MqttError> {
        self.put_bytes(&val.to_be_bytes())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), MqttError> {
        let end = self.pos + bytes.len();
        self.buf
            .get_mut(self.pos..end)
            .ok_or(MqttError::BufferTooSmall)?
            .copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    /// `[2-byte big-endian length][bytes]`.
    fn put_prefixed(&mut self, bytes: &[u8]) -> Result<(), MqttError> {
        let len = u16::try_from(bytes.len()).map_err(|_| MqttError::TooLong)?;
        self.put_u16(len)?;
        self.put_bytes(bytes)
    }

    fn put_fixed_header(&mut self, control: u8, remaining: usize) -> Result<(), MqttError> {
        self.put_u8(control)?;
        let rest = self.buf.get_mut(self.pos..).ok_or(MqttError::BufferTooSmall)?;
        self.pos += encode_remaining_length(remaining, rest)?;
        Ok(())
    }
}

#[inline]
fn prefixed_len(bytes: &[u8]) -> usize {
    2 + bytes.len()
}

/// Last will carried in CONNECT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Will<'a> {
    pub topic: &'a str,
    pub message: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

/// Everything that goes into a CONNECT packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectOptions<'a> {
    pub client_id: &'a str,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub will: Option<Will<'a>>,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

impl ConnectOptions<'_> {
    pub fn flags(&self) -> ConnectFlags {
        let mut flags = ConnectFlags::empty();
        flags.set(ConnectFlags::CLEAN_SESSION, self.clean_session);
        if let Some(will) = &self.will {
            flags |= ConnectFlags::WILL;
            match will.qos {
                QoS::AtMostOnce => {}
                QoS::AtLeastOnce => flags |= ConnectFlags::WILL_QOS_1,
                QoS::ExactlyOnce => flags |= ConnectFlags::WILL_QOS_2,
            }
            flags.set(ConnectFlags::WILL_RETAIN, will.retain);
        }
        flags.set(ConnectFlags::USERNAME, self.username.is_some());
        flags.set(ConnectFlags::PASSWORD, self.password.is_some());
        flags
    }

    fn payload_len(&self) -> usize {
        let mut len = prefixed_len(self.client_id.as_bytes());
        if let Some(will) = &self.will {
            len += prefixed_len(will.topic.as_bytes()) + prefixed_len(will.message);
        }
        if let Some(user) = self.username {
            len += prefixed_len(user.as_bytes());
        }
        if let Some(pass) = self.password {
            len += prefixed_len(pass);
        }
        len
    }
}

/// CONNECT. Payload fields follow in flag-bit order: client id, will topic,
/// will message, username, password.
pub fn encode_connect(opts: &ConnectOptions<'_>, out: &mut [u8]) -> Result<usize, MqttError> {
    let remaining = CONNECT_VARIABLE_HEADER_LEN + opts.payload_len();
    let mut w = Writer::new(out);
    w.put_fixed_header(CONNECT, remaining)?;
    w.put_prefixed(PROTOCOL_NAME)?;
    w.put_u8(PROTOCOL_LEVEL)?;
    w.put_u8(opts.flags().bits())?;
    w.put_u16(opts.keep_alive)?;
    w.put_prefixed(opts.client_id.as_bytes())?;
    if let Some(will) = &opts.will {
        w.put_prefixed(will.topic.as_bytes())?;
        w.put_prefixed(will.message)?;
    }
    if let Some(user) = opts.username {
        w.put_prefixed(user.as_bytes())?;
    }
    if let Some(pass) = opts.password {
        w.put_prefixed(pass)?;
    }
    Ok(w.pos)
}

/// QoS 0 PUBLISH: topic then raw payload, no packet identifier.
pub fn encode_publish(
    topic: &str,
    payload: &[u8],
    retain: bool,
    out: &mut [u8],
) -> Result<usize, MqttError> {
    let remaining = prefixed_len(topic.as_bytes()) + payload.len();
    let control = if retain { PUBLISH | 0x01 } else { PUBLISH };
    let mut w = Writer::new(out);
    w.put_fixed_header(control, remaining)?;
    w.put_prefixed(topic.as_bytes())?;
    w.put_bytes(payload)?;
    Ok(w.pos)
}

/// SUBSCRIBE with one requested QoS byte after each topic filter.
pub fn encode_subscribe(
    packet_id: u16,
    topics: &[(&str, QoS)],
    out: &mut [u8],
) -> Result<usize, MqttError> {
    if topics.is_empty() {
        return Err(MqttError::Malformed);
    }
    let remaining = 2 + topics
        .iter()
        .map(|(t, _)| prefixed_len(t.as_bytes()) + 1)
        .sum::<usize>();
    let mut w = Writer::new(out);
    w.put_fixed_header(SUBSCRIBE | RESERVED_FLAGS_0010, remaining)?;
    w.put_u16(packet_id)?;
    for (topic, qos) in topics {
        w.put_prefixed(topic.as_bytes())?;
        w.put_u8(*qos as u8)?;
    }
    Ok(w.pos)
}

pub fn encode_unsubscribe(
    packet_id: u16,
    topics: &[&str],
    out: &mut [u8],
) -> Result<usize, MqttError> {
    if topics.is_empty() {
        return Err(MqttError::Malformed);
    }
    let remaining = 2 + topics.iter().map(|t| prefixed_len(t.as_bytes())).sum::<usize>();
    let mut w = Writer::new(out);
    w.put_fixed_header(UNSUBSCRIBE | RESERVED_FLAGS_0010, remaining)?;
    w.put_u16(packet_id)?;
    for topic in topics {
        w.put_prefixed(topic.as_bytes())?;
    }
    Ok(w.pos)
}

pub fn encode_disconnect(out: &mut [u8]) -> Result<usize, MqttError> {
    let mut w = Writer::new(out);
    w.put_fixed_header(DISCONNECT, 0)?;
    Ok(w.pos)
}

pub fn encode_pingreq(out: &mut [u8]) -> Result<usize, MqttError> {
    let mut w = Writer::new(out);
    w.put_fixed_header(PINGREQ, 0)?;
    Ok(w.pos)
}

// =============================================================================
// Decoding
// =============================================================================

/// An application message received from the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Present only for QoS 1 and 2.
    pub packet_id: Option<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Packet<'a> {
    ConnAck { session_present: bool, return_code: u8 },
    Publish(Publish<'a>),
    SubAck { packet_id: u16, return_codes: &'a [u8] },
    UnsubAck { packet_id: u16 },
    PingResp,
    /// A well-framed packet this client does not act on.
    Other { control: u8 },
}

/// Split the fixed header: `(control byte, body, total packet length)`.
fn split_packet(buf: &[u8]) -> Result<(u8, &[u8], usize), MqttError> {
    let control = *buf.first().ok_or(MqttError::Truncated)?;
    let (remaining, len_bytes) = decode_remaining_length(&buf[1..])?;
    let start = 1 + len_bytes;
    let end = start.checked_add(remaining).ok_or(MqttError::Malformed)?;
    let body = buf.get(start..end).ok_or(MqttError::Truncated)?;
    Ok((control, body, end))
}

/// Decode the packet at the start of `buf`, returning it and its length.
pub fn decode_packet(buf: &[u8]) -> Result<(Packet<'_>, usize), MqttError> {
    let (control, body, total) = split_packet(buf)?;
    let packet = match control & 0xf0 {
        CONNACK => {
            if body.len() != 2 {
                return Err(MqttError::Malformed);
            }
            Packet::ConnAck {
                session_present: body[0] & 0x01 != 0,
                return_code: body[1],
            }
        }
        PUBLISH => Packet::Publish(decode_publish(control, body)?),
        SUBACK => {
            if body.len() < 3 {
                return Err(MqttError::Malformed);
            }
            Packet::SubAck {
                packet_id: get_u16(body, 0),
                return_codes: &body[2..],
            }
        }
        UNSUBACK => {
            if body.len() != 2 {
                return Err(MqttError::Malformed);
            }
            Packet::UnsubAck {
                packet_id: get_u16(body, 0),
            }
        }
        PINGRESP => Packet::PingResp,
        _ => Packet::Other { control },
    };
    Ok((packet, total))
}

fn decode_publish(control: u8, body: &[u8]) -> Result<Publish<'_>, MqttError> {
    let qos = QoS::from_u8((control >> 1) & 0x03).ok_or(MqttError::Malformed)?;
    if body.len() < 2 {
        return Err(MqttError::Malformed);
    }
    let topic_len = get_u16(body, 0) as usize;
    let mut pos = 2 + topic_len;
    let topic = body.get(2..pos).ok_or(MqttError::Malformed)?;
    let topic = core::str::from_utf8(topic).map_err(|_| MqttError::Malformed)?;
    let packet_id = if qos == QoS::AtMostOnce {
        None
    } else {
        let id = body.get(pos..pos + 2).ok_or(MqttError::Malformed)?;
        pos += 2;
        Some(u16::from_be_bytes([id[0], id[1]]))
    };
    Ok(Publish {
        topic,
        payload: &body[pos..],
        qos,
        retain: control & 0x01 != 0,
        dup: control & 0x08 != 0,
        packet_id,
    })
}

/// Walk a TCP payload that may hold several packets back to back.
/// Stops at the first packet that does not decode.
pub fn packets(buf: &[u8]) -> Packets<'_> {
    Packets { rest: buf }
}

pub struct Packets<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Packets<'a> {
    type Item = Result<Packet<'a>, MqttError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match decode_packet(self.rest) {
            Ok((packet, used)) => {
                self.rest = &self.rest[used..];
                Some(Ok(packet))
            }
            Err(e) => {
                self.rest = &[];
                Some(Err(e))
            }
        }
    }
}

/// Message bytes of the PUBLISH at the start of `buf`.
pub fn publish_message(buf: &[u8]) -> Option<&[u8]> {
    match decode_packet(buf) {
        Ok((Packet::Publish(p), _)) => Some(p.payload),
        _ => None,
    }
}

/// `remaining length - topic length - 2` for a QoS 0 PUBLISH.
pub fn publish_message_length(buf: &[u8]) -> Option<usize> {
    publish_message(buf).map(<[u8]>::len)
}
