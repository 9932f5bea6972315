//! Hardware descriptor layout.
//!
//! Each descriptor is four little-endian 32-bit words shared with the device:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┐
//! │  buf0    │  ctrl    │  buf1    │  info    │
//! └──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! `ctrl` carries both segment lengths, their LAST flags, and the DMA_DONE
//! ownership bit. Its exact bit layout is device specific and lives behind
//! [`DescriptorCodec`].
//!
//! # Ordering
//! Producers write buf0/buf1/info first and `ctrl` last with Release
//! ordering; consumers read `ctrl` with Acquire before touching anything
//! else. The doorbell write is preceded by a full fence in
//! [`DescRing::kick`](crate::ring::DescRing::kick).

pub mod codec;

use core::sync::atomic::{AtomicU32, Ordering};

pub use codec::{DescriptorCodec, SplitLenCodec};

/// One hardware descriptor.
#[repr(C, align(4))]
pub struct HwDesc {
    buf0: AtomicU32,
    ctrl: AtomicU32,
    buf1: AtomicU32,
    info: AtomicU32,
}

const _: () = assert!(core::mem::size_of::<HwDesc>() == 16);

impl HwDesc {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Write a complete descriptor. `ctrl` is stored last, with Release.
    pub fn publish(&self, buf0: u32, buf1: u32, info: u32, ctrl: u32) {
        self.buf0.store(buf0.to_le(), Ordering::Relaxed);
        self.buf1.store(buf1.to_le(), Ordering::Relaxed);
        self.info.store(info.to_le(), Ordering::Relaxed);
        self.ctrl.store(ctrl.to_le(), Ordering::Release);
    }

    /// Read the control word (Acquire).
    #[inline]
    pub fn load_ctrl(&self) -> u32 {
        u32::from_le(self.ctrl.load(Ordering::Acquire))
    }

    /// Overwrite only the control word (Release).
    #[inline]
    pub fn set_ctrl(&self, ctrl: u32) {
        self.ctrl.store(ctrl.to_le(), Ordering::Release);
    }

    #[inline]
    pub fn buf0(&self) -> u32 {
        u32::from_le(self.buf0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn buf1(&self) -> u32 {
        u32::from_le(self.buf1.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn info(&self) -> u32 {
        u32::from_le(self.info.load(Ordering::Relaxed))
    }
}

/// Decoded form of the control word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescFields {
    /// Length of segment 0 (for RX: bytes the device wrote).
    pub len0: u16,
    /// Length of segment 1, zero when unused.
    pub len1: u16,
    /// Segment 0 ends the packet.
    pub last0: bool,
    /// Segment 1 ends the packet.
    pub last1: bool,
    /// Device has finished with this descriptor.
    pub done: bool,
}

impl DescFields {
    /// A descriptor carrying one segment.
    pub fn single(len: u16, last: bool) -> Self {
        Self {
            len0: len,
            last0: last,
            ..Self::default()
        }
    }

    /// A descriptor carrying two segments.
    pub fn pair(len0: u16, last0: bool, len1: u16, last1: bool) -> Self {
        Self {
            len0,
            len1,
            last0,
            last1,
            done: false,
        }
    }

    /// Whether either segment ends the packet.
    pub fn is_last(&self) -> bool {
        self.last0 || self.last1
    }
}
