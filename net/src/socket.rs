//! Fixed-capacity session table.
//!
//! Slot 0 is never handed out. Every session gets a local port whose low
//! bits are its slot index (`local_port & SLOT_MASK == index`), so an
//! inbound segment is matched to its session from the destination port alone.
//! Handles carry a generation so a handle to a freed slot never aliases the
//! session that reuses it.

use core::fmt;

use ethmq_lib::dlog_debug;

use crate::tcp::TcpState;
use crate::timer::SocketTimer;
use crate::types::{IpProtocol, Ipv4Addr, MacAddr, NetError, Port, SockAddr};

/// Slots in the table, including reserved slot 0. Must be a power of two.
pub const MAX_SOCKETS: usize = 8;
pub const SLOT_MASK: u16 = (MAX_SOCKETS - 1) as u16;

/// Local ports are drawn from the dynamic range 0xC000..=0xFFFF.
const LOCAL_PORT_BASE: u16 = 0xC000;
const LOCAL_PORT_RANDOM_MASK: u16 = 0x3FFF & !SLOT_MASK;

const _: () = assert!(MAX_SOCKETS.is_power_of_two() && MAX_SOCKETS >= 2);

/// Typed reference to a live slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SocketHandle {
    index: u8,
    generation: u16,
}

impl SocketHandle {
    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn generation(self) -> u16 {
        self.generation
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot={}", self.index)
    }
}

/// One logical connection: addressing plus TCP sequence state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Socket {
    pub protocol: IpProtocol,
    /// Learned through ARP; `None` until the peer answers.
    pub remote_mac: Option<MacAddr>,
    pub remote_ip: Ipv4Addr,
    pub local_port: Port,
    pub remote_port: Port,
    pub state: TcpState,
    /// Initial send sequence number.
    pub iss: u32,
    /// Next sequence number we will send.
    pub seq: u32,
    /// Next sequence number we expect from the peer.
    pub ack: u32,
    pub timer: Option<SocketTimer>,
    /// Unanswered firings of the current timer.
    pub retries: u8,
}

impl Socket {
    const EMPTY: Self = Self {
        protocol: IpProtocol::Tcp,
        remote_mac: None,
        remote_ip: Ipv4Addr::UNSPECIFIED,
        local_port: Port(0),
        remote_port: Port(0),
        state: TcpState::Closed,
        iss: 0,
        seq: 0,
        ack: 0,
        timer: None,
        retries: 0,
    };

    #[inline]
    pub fn remote(&self) -> SockAddr {
        SockAddr::new(self.remote_ip, self.remote_port)
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.remote_mac.is_some()
    }

    /// Zero the sequence state and go back to SYN_SENT with a new ISN.
    pub fn restart_handshake(&mut self, iss: u32) {
        self.state = TcpState::SynSent;
        self.iss = iss;
        self.seq = iss;
        self.ack = 0;
        self.timer = None;
        self.retries = 0;
    }
}

#[derive(Clone, Copy)]
struct Slot {
    in_use: bool,
    generation: u16,
    socket: Socket,
}

impl Slot {
    const EMPTY: Self = Self {
        in_use: false,
        generation: 0,
        socket: Socket::EMPTY,
    };
}

pub struct SocketTable {
    slots: [Slot; MAX_SOCKETS],
}

impl Default for SocketTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketTable {
    pub const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; MAX_SOCKETS],
        }
    }

    #[inline]
    fn handle_for(&self, index: usize) -> SocketHandle {
        SocketHandle {
            index: index as u8,
            generation: self.slots[index].generation,
        }
    }

    /// Claim the first free slot for a session to `remote`.
    ///
    /// Fails with `AddressInUse` if a live session already targets the same
    /// address, port and protocol, and with `TableFull` if no slot is free.
    /// `port_seed` randomises the local port above the slot bits.
    pub fn open(
        &mut self,
        protocol: IpProtocol,
        remote: SockAddr,
        port_seed: u16,
    ) -> Result<SocketHandle, NetError> {
        let duplicate = self.iter().any(|(_, s)| s.protocol == protocol && s.remote() == remote);
        if duplicate {
            return Err(NetError::AddressInUse);
        }

        let index = (1..MAX_SOCKETS)
            .find(|&i| !self.slots[i].in_use)
            .ok_or(NetError::TableFull)?;

        let slot = &mut self.slots[index];
        slot.in_use = true;
        slot.socket = Socket {
            protocol,
            remote_ip: remote.ip,
            remote_port: remote.port,
            local_port: Port(LOCAL_PORT_BASE | (port_seed & LOCAL_PORT_RANDOM_MASK) | index as u16),
            ..Socket::EMPTY
        };
        dlog_debug!(
            "socket: open {} {} -> {} local_port={}",
            protocol,
            index,
            remote,
            slot.socket.local_port
        );
        Ok(self.handle_for(index))
    }

    /// Free a slot. Returns false if the handle was already stale.
    pub fn release(&mut self, handle: SocketHandle) -> bool {
        if self.get(handle).is_none() {
            return false;
        }
        let slot = &mut self.slots[handle.index()];
        slot.in_use = false;
        slot.socket = Socket::EMPTY;
        slot.generation = slot.generation.wrapping_add(1);
        dlog_debug!("socket: release {}", handle);
        true
    }

    /// Socket behind a live handle.
    ///
    /// # Panics
    /// If the handle's index is outside the table.
    pub fn get(&self, handle: SocketHandle) -> Option<&Socket> {
        assert!(handle.index() < MAX_SOCKETS, "socket index out of range");
        let slot = &self.slots[handle.index()];
        (slot.in_use && slot.generation == handle.generation).then_some(&slot.socket)
    }

    /// # Panics
    /// If the handle's index is outside the table.
    pub fn get_mut(&mut self, handle: SocketHandle) -> Option<&mut Socket> {
        assert!(handle.index() < MAX_SOCKETS, "socket index out of range");
        let slot = &mut self.slots[handle.index()];
        (slot.in_use && slot.generation == handle.generation).then_some(&mut slot.socket)
    }

    #[inline]
    pub fn is_live(&self, handle: SocketHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Match an inbound TCP segment to its session through the slot bits of
    /// its destination port, then confirm the full tuple.
    pub fn lookup_tcp(&self, local_port: Port, remote: SockAddr) -> Option<SocketHandle> {
        let index = (local_port.as_u16() & SLOT_MASK) as usize;
        let slot = &self.slots[index];
        let s = &slot.socket;
        (slot.in_use
            && s.protocol == IpProtocol::Tcp
            && s.local_port == local_port
            && s.remote() == remote)
            .then(|| self.handle_for(index))
    }

    /// First live session of `protocol` with peer `ip`.
    pub fn find_by_remote_ip(&self, protocol: IpProtocol, ip: Ipv4Addr) -> Option<SocketHandle> {
        self.iter()
            .find(|(_, s)| s.protocol == protocol && s.remote_ip == ip)
            .map(|(h, _)| h)
    }

    /// Live sessions, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SocketHandle, &Socket)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, slot)| slot.in_use)
            .map(|(i, slot)| (self.handle_for(i), &slot.socket))
    }

    pub fn active_count(&self) -> usize {
        self.iter().count()
    }

    /// Free every slot, invalidating all handles.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            if slot.in_use {
                slot.generation = slot.generation.wrapping_add(1);
            }
            slot.in_use = false;
            slot.socket = Socket::EMPTY;
        }
    }
}
