//! The single reusable frame buffer.
//!
//! One buffer holds either the frame just received or the frame being built,
//! never both at once. Anything needed from a received frame must be copied
//! out before a reply is built into the same storage.

/// Ethernet header 14 + 4 (VLAN tag room) + MTU 1500 + CRC 4.
pub const FRAME_MAX: usize = 1522;

pub struct FrameBuf {
    data: [u8; FRAME_MAX],
    len: usize,
}

impl Default for FrameBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuf {
    pub const fn new() -> Self {
        Self {
            data: [0; FRAME_MAX],
            len: 0,
        }
    }

    /// Bytes of the current frame.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Whole backing storage, for building a frame or receiving into.
    #[inline]
    pub fn storage_mut(&mut self) -> &mut [u8; FRAME_MAX] {
        &mut self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record the length of the frame now held. Clamped to capacity.
    #[inline]
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(FRAME_MAX);
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }
}
