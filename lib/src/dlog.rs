//! Device logging.
//!
//! Every log line in the stack goes through a single **backend** function
//! registered by the platform layer (typically a UART writer). Until one is
//! registered, lines are discarded: the stack never touches hardware itself.
//!
//! # Backend contract
//!
//! The backend receives the level and the pre-formatted arguments for a
//! **single log line** and must append its own line terminator.
//!
//! ```ignore
//! ethmq_lib::dlog::dlog_register_backend(uart_log_line);
//! ```

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use spin::RwLock;

// ---------------------------------------------------------------------------
// Log levels
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl DlogLevel {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => DlogLevel::Error,
            1 => DlogLevel::Warn,
            2 => DlogLevel::Info,
            3 => DlogLevel::Debug,
            _ => DlogLevel::Trace,
        }
    }

    pub const fn tag(self) -> &'static str {
        match self {
            DlogLevel::Error => "ERR",
            DlogLevel::Warn => "WRN",
            DlogLevel::Info => "INF",
            DlogLevel::Debug => "DBG",
            DlogLevel::Trace => "TRC",
        }
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(DlogLevel::Info as u8);

#[inline(always)]
fn is_enabled(level: DlogLevel) -> bool {
    level as u8 <= CURRENT_LEVEL.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Backend dispatch
// ---------------------------------------------------------------------------

/// Signature of a dlog backend. Writes one line, terminator included.
pub type DlogBackend = fn(DlogLevel, fmt::Arguments<'_>);

static BACKEND: RwLock<Option<DlogBackend>> = RwLock::new(None);

#[inline]
fn dispatch(level: DlogLevel, args: fmt::Arguments<'_>) {
    let backend = *BACKEND.read();
    if let Some(backend) = backend {
        backend(level, args);
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Register the platform's log sink, replacing any previous one.
pub fn dlog_register_backend(backend: DlogBackend) {
    *BACKEND.write() = Some(backend);
}

/// Drop the registered sink; subsequent lines are discarded.
pub fn dlog_clear_backend() {
    *BACKEND.write() = None;
}

pub fn dlog_set_level(level: DlogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn dlog_get_level() -> DlogLevel {
    DlogLevel::from_raw(CURRENT_LEVEL.load(Ordering::Relaxed))
}

pub fn is_enabled_level(level: DlogLevel) -> bool {
    is_enabled(level)
}

/// Emit a formatted log line at the given level.
///
/// Callers should not include a trailing newline.
pub fn log_args(level: DlogLevel, args: fmt::Arguments<'_>) {
    if !is_enabled(level) {
        return;
    }
    dispatch(level, args);
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

#[macro_export]
macro_rules! dlog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::dlog::log_args($level, ::core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! dlog_error {
    ($($arg:tt)*) => {
        $crate::dlog::log_args($crate::dlog::DlogLevel::Error, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! dlog_warn {
    ($($arg:tt)*) => {
        $crate::dlog::log_args($crate::dlog::DlogLevel::Warn, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! dlog_info {
    ($($arg:tt)*) => {
        $crate::dlog::log_args($crate::dlog::DlogLevel::Info, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! dlog_debug {
    ($($arg:tt)*) => {
        $crate::dlog::log_args($crate::dlog::DlogLevel::Debug, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! dlog_trace {
    ($($arg:tt)*) => {
        $crate::dlog::log_args($crate::dlog::DlogLevel::Trace, ::core::format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    static LINES: AtomicUsize = AtomicUsize::new(0);

    fn counting_backend(_level: DlogLevel, _args: fmt::Arguments<'_>) {
        LINES.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn level_filter_and_backend() {
        assert!(DlogLevel::Error < DlogLevel::Trace);
        assert_eq!(DlogLevel::from_raw(9), DlogLevel::Trace);
        assert_eq!(DlogLevel::Warn.tag(), "WRN");

        dlog_register_backend(counting_backend);
        dlog_set_level(DlogLevel::Warn);
        let before = LINES.load(Ordering::Relaxed);
        dlog_warn!("shown {}", 1);
        dlog_debug!("hidden {}", 2);
        assert!(LINES.load(Ordering::Relaxed) > before);
        assert_eq!(dlog_get_level(), DlogLevel::Warn);
        dlog_set_level(DlogLevel::Info);
    }
}
