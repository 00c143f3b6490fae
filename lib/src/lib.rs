#![no_std]

#[cfg(test)]
extern crate std;

pub mod dlog;
pub mod ring_buffer;
pub mod testing;

#[doc(hidden)]
pub use paste;

pub use dlog::{DlogLevel, dlog_get_level, dlog_register_backend, dlog_set_level};
pub use ring_buffer::RingBuffer;
