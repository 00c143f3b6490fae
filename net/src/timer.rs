//! Per-session deadlines and the retry supervisor.
//!
//! Each session carries at most one [`SocketTimer`]. The loop collects the
//! expired ones first with [`collect_expired`], then hands each to
//! [`supervise`], so no table borrow is held while the outcome is acted on.
//!
//! A firing first checks whether the awaited response already arrived; if so
//! it is a no-op. Otherwise the request is re-raised up to a fixed number of
//! times at a fixed interval, after which the session is abandoned.

use ethmq_lib::{dlog_debug, dlog_warn};
use heapless::Vec;

use crate::pending::{Action, PendingActions};
use crate::socket::{MAX_SOCKETS, Socket, SocketHandle, SocketTable};
use crate::tcp::TcpState;

pub const ARP_RETRY_MS: u64 = 1000;
pub const HANDSHAKE_RETRY_MS: u64 = 5000;
pub const TIME_WAIT_MS: u64 = 2000;
pub const PING_TIMEOUT_MS: u64 = 2000;

pub const MAX_ARP_RETRIES: u8 = 5;
pub const MAX_HANDSHAKE_RETRIES: u8 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// Waiting for the peer to answer our ARP request.
    ArpResponse,
    /// Waiting for SYN|ACK.
    Handshake,
    /// Lingering after close before the slot is freed.
    TimeWait,
    /// Waiting for an ICMP echo reply.
    PingReply,
}

impl TimerKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::ArpResponse => "arp",
            Self::Handshake => "handshake",
            Self::TimeWait => "time-wait",
            Self::PingReply => "ping",
        }
    }

    pub const fn interval_ms(self) -> u64 {
        match self {
            Self::ArpResponse => ARP_RETRY_MS,
            Self::Handshake => HANDSHAKE_RETRY_MS,
            Self::TimeWait => TIME_WAIT_MS,
            Self::PingReply => PING_TIMEOUT_MS,
        }
    }

    /// Firings tolerated before the session is abandoned; `None` for
    /// single-shot timers.
    pub const fn max_retries(self) -> Option<u8> {
        match self {
            Self::ArpResponse => Some(MAX_ARP_RETRIES),
            Self::Handshake => Some(MAX_HANDSHAKE_RETRIES),
            Self::TimeWait | Self::PingReply => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketTimer {
    pub kind: TimerKind,
    pub deadline_ms: u64,
}

/// Start `kind` on `sock`. Switching to a different kind resets the retry
/// count; re-arming the same kind keeps it.
pub fn arm(sock: &mut Socket, kind: TimerKind, now_ms: u64) {
    if sock.timer.map(|t| t.kind) != Some(kind) {
        sock.retries = 0;
    }
    sock.timer = Some(SocketTimer {
        kind,
        deadline_ms: now_ms.saturating_add(kind.interval_ms()),
    });
}

pub fn stop(sock: &mut Socket) {
    sock.timer = None;
    sock.retries = 0;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FiredTimer {
    pub handle: SocketHandle,
    pub kind: TimerKind,
}

/// Timers whose deadline has passed.
pub fn collect_expired(table: &SocketTable, now_ms: u64) -> Vec<FiredTimer, MAX_SOCKETS> {
    let mut fired = Vec::new();
    for (handle, sock) in table.iter() {
        if let Some(timer) = sock.timer
            && now_ms >= timer.deadline_ms
        {
            // Capacity equals the table size; one timer per slot.
            let _ = fired.push(FiredTimer {
                handle,
                kind: timer.kind,
            });
        }
    }
    fired
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The awaited response already arrived, or the handle went stale.
    Satisfied,
    /// The request was raised again.
    Retried { attempt: u8 },
    /// Retries exhausted: the slot was freed and its queued actions dropped.
    Abandoned,
    /// A single-shot timer ran out and freed the slot.
    Expired,
}

/// Act on one expired timer.
pub fn supervise(
    table: &mut SocketTable,
    pending: &mut PendingActions,
    fired: FiredTimer,
    now_ms: u64,
) -> TimerOutcome {
    let handle = fired.handle;
    let Some(sock) = table.get_mut(handle) else {
        return TimerOutcome::Satisfied;
    };
    if sock.timer.map(|t| t.kind) != Some(fired.kind) {
        return TimerOutcome::Satisfied;
    }

    let (still_waiting, resend) = match fired.kind {
        TimerKind::ArpResponse => (!sock.is_resolved(), Action::SendArpRequest(handle)),
        TimerKind::Handshake => (sock.state == TcpState::SynSent, Action::SendSyn(handle)),
        TimerKind::TimeWait | TimerKind::PingReply => {
            dlog_debug!("timer: {} expired for {}", fired.kind.name(), handle);
            table.release(handle);
            pending.cancel_for(handle);
            return TimerOutcome::Expired;
        }
    };

    if !still_waiting {
        stop(sock);
        return TimerOutcome::Satisfied;
    }

    sock.retries += 1;
    let max = fired.kind.max_retries().unwrap_or(0);
    if sock.retries < max {
        let attempt = sock.retries;
        arm(sock, fired.kind, now_ms);
        dlog_debug!(
            "timer: {} retry {}/{} for {}",
            fired.kind.name(),
            attempt,
            max,
            handle
        );
        pending.raise(resend);
        return TimerOutcome::Retried { attempt };
    }

    dlog_warn!(
        "timer: {} abandoned for {} after {} attempts",
        fired.kind.name(),
        handle,
        sock.retries
    );
    table.release(handle);
    pending.cancel_for(handle);
    TimerOutcome::Abandoned
}
