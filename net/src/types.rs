//! Value types shared by every layer of the stack.
//!
//! Addresses are plain `Copy` values; nothing here borrows from a frame
//! buffer, so fields can be copied out of a received frame before the same
//! buffer is rebuilt for transmission.

use core::fmt;

// =============================================================================
// Addresses
// =============================================================================

/// IPv4 address, stored in network byte order.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ipv4Addr(pub [u8; 4]);

impl Ipv4Addr {
    pub const UNSPECIFIED: Self = Self([0, 0, 0, 0]);
    pub const BROADCAST: Self = Self([255, 255, 255, 255]);

    #[inline]
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self([a, b, c, d])
    }

    #[inline]
    pub const fn from_u32_be(val: u32) -> Self {
        Self(val.to_be_bytes())
    }

    #[inline]
    pub const fn to_u32_be(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    #[inline]
    pub const fn is_unspecified(&self) -> bool {
        self.to_u32_be() == 0
    }

    #[inline]
    pub const fn is_broadcast(&self) -> bool {
        self.to_u32_be() == u32::MAX
    }

    /// `true` if `addr` and `network` share the prefix selected by `mask`.
    #[inline]
    pub const fn in_subnet(addr: Ipv4Addr, network: Ipv4Addr, mask: Ipv4Addr) -> bool {
        let m = mask.to_u32_be();
        (addr.to_u32_be() & m) == (network.to_u32_be() & m)
    }

    /// Read four octets at `off`, `None` if the slice is too short.
    #[inline]
    pub fn read(buf: &[u8], off: usize) -> Option<Self> {
        let bytes = buf.get(off..off + 4)?;
        Some(Self([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Parse dotted-quad notation (`"192.168.1.10"`).
    pub fn parse(text: &str) -> Option<Self> {
        let mut out = [0u8; 4];
        let mut parts = text.trim().split('.');
        for octet in out.iter_mut() {
            let part = parts.next()?;
            if part.is_empty() || part.len() > 3 {
                return None;
            }
            *octet = part.parse::<u8>().ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Self(out))
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Port number in host byte order.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Port(pub u16);

impl Port {
    pub const MQTT: Self = Self(1883);

    #[inline]
    pub const fn new(val: u16) -> Self {
        Self(val)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({})", self.0)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ethernet hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: Self = Self([0xff; 6]);
    pub const ZERO: Self = Self([0; 6]);

    #[inline]
    pub fn read(buf: &[u8], off: usize) -> Option<Self> {
        let bytes = buf.get(off..off + 6)?;
        let mut out = [0u8; 6];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// IP address and port of one endpoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SockAddr {
    pub ip: Ipv4Addr,
    pub port: Port,
}

impl SockAddr {
    #[inline]
    pub const fn new(ip: Ipv4Addr, port: Port) -> Self {
        Self { ip, port }
    }
}

impl fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

// =============================================================================
// Protocol discriminators
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EtherType {
    Ipv4 = 0x0800,
    Arp = 0x0806,
}

impl EtherType {
    #[inline]
    pub const fn from_u16(val: u16) -> Option<Self> {
        match val {
            0x0800 => Some(Self::Ipv4),
            0x0806 => Some(Self::Arp),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Protocol carried by an IPv4 packet, and the protocol of a session slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IpProtocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl IpProtocol {
    #[inline]
    pub const fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(Self::Icmp),
            6 => Some(Self::Tcp),
            17 => Some(Self::Udp),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Icmp => write!(f, "ICMP"),
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}

// =============================================================================
// NetError
// =============================================================================

/// Error returned by stack commands.
///
/// Failures that happen later, while the loop is running (refusals, timeouts),
/// are reported as [`crate::notice::Notice`] values instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetError {
    /// Every session slot is in use.
    TableFull,
    /// Every topic slot is in use.
    TopicTableFull,
    /// Another live session already targets the same peer, port and protocol.
    AddressInUse,
    /// A required address (e.g. the MQTT broker) is not configured.
    AddressNotAvailable,
    /// The session or MQTT link is not up.
    NotConnected,
    /// The MQTT link is already up or being brought up.
    AlreadyConnected,
    /// Another MQTT operation is in flight.
    Busy,
    /// The session is not in a state that permits the request.
    InvalidState,
    InvalidArgument,
    TopicTooLong,
    TopicNotFound,
    MessageTooLong,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableFull => write!(f, "no free socket"),
            Self::TopicTableFull => write!(f, "topic table full"),
            Self::AddressInUse => write!(f, "connection to that address already exists"),
            Self::AddressNotAvailable => write!(f, "address not configured"),
            Self::NotConnected => write!(f, "not connected"),
            Self::AlreadyConnected => write!(f, "already connected"),
            Self::Busy => write!(f, "operation already in progress"),
            Self::InvalidState => write!(f, "invalid connection state"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::TopicTooLong => write!(f, "topic name too long"),
            Self::TopicNotFound => write!(f, "not subscribed to that topic"),
            Self::MessageTooLong => write!(f, "message too long"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dotted_quad() {
        assert_eq!(Ipv4Addr::parse("192.168.1.10"), Some(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(Ipv4Addr::parse(" 10.0.0.1 "), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(Ipv4Addr::parse("10.0.0"), None);
        assert_eq!(Ipv4Addr::parse("10.0.0.1.5"), None);
        assert_eq!(Ipv4Addr::parse("10.0.0.256"), None);
        assert_eq!(Ipv4Addr::parse("10..0.1"), None);
    }

    #[test]
    fn subnet_membership() {
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let net = Ipv4Addr::new(192, 168, 1, 0);
        assert!(Ipv4Addr::in_subnet(Ipv4Addr::new(192, 168, 1, 77), net, mask));
        assert!(!Ipv4Addr::in_subnet(Ipv4Addr::new(192, 168, 2, 77), net, mask));
    }

    #[test]
    fn read_respects_bounds() {
        let buf = [1u8, 2, 3, 4, 5, 6];
        assert_eq!(Ipv4Addr::read(&buf, 2), Some(Ipv4Addr::new(3, 4, 5, 6)));
        assert_eq!(Ipv4Addr::read(&buf, 3), None);
        assert_eq!(MacAddr::read(&buf, 0), Some(MacAddr([1, 2, 3, 4, 5, 6])));
        assert_eq!(MacAddr::read(&buf, 1), None);
    }
}
