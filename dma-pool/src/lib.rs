//! Firmware-agnostic DMA memory primitives.
//!
//! This crate provides the device-addressing half of every bare-metal
//! packet driver: turning CPU memory into bus addresses a device may DMA
//! to or from, and handing back page-aligned coherent regions for
//! descriptor rings.
//!
//! Address translation is pluggable behind [`DmaMapper`]: an identity
//! mapper for platforms where bus and physical addresses agree, and an IOVA
//! window allocator for everything else. A failed map leaves nothing mapped.
//!
//! # Usage
//!
//! ```ignore
//! use dma_pool::{DmaDirection, DmaMapper, IovaMapper, MemoryRegion};
//!
//! let mapper = IovaMapper::new(MemoryRegion::new(0x1000_0000, 0x100_0000));
//! let bus = mapper.map(ptr, 2048, DmaDirection::FromDevice)?;
//! // ... program `bus` into a descriptor ...
//! mapper.unmap(bus, 2048, DmaDirection::FromDevice)?;
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod coherent;
pub mod identity;
pub mod iova;

use core::ptr::NonNull;

pub use coherent::CoherentRegion;
pub use identity::IdentityMapper;
pub use iova::IovaMapper;

/// Page size (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Addressing mask of a device limited to 32-bit bus addresses.
pub const DMA_MASK_32: u64 = 0xFFFF_FFFF;

/// Align a value up to a power-of-two boundary.
#[inline]
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

// ============================================================================
// Memory regions
// ============================================================================

/// A range of addresses, either CPU-physical or device bus space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Base address.
    pub base: usize,
    /// Size in bytes.
    pub size: usize,
}

impl MemoryRegion {
    /// Create a new memory region.
    pub const fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// One past the last address of the region.
    pub const fn end(&self) -> usize {
        self.base + self.size
    }

    /// Check whether `[addr, addr + len)` lies entirely inside the region.
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.base && end <= self.end(),
            None => false,
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

/// DMA allocation and mapping errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DmaError {
    /// Requested 0 bytes.
    #[error("zero-sized DMA request")]
    ZeroSize,
    /// The allocator could not provide memory.
    #[error("out of DMA memory")]
    OutOfMemory,
    /// The memory lies beyond what the device can address.
    #[error("buffer at {addr:#x} is beyond the device addressing mask {mask:#x}")]
    AddressLimit {
        /// Last byte address of the rejected buffer.
        addr: u64,
        /// Device addressing mask.
        mask: u64,
    },
    /// No room left in the bus address window.
    #[error("bus address window exhausted")]
    WindowExhausted,
    /// Unmap of an address that has no live mapping.
    #[error("no mapping at bus address {0:#x}")]
    NotMapped(u64),
    /// Invalid memory region.
    #[error("invalid memory region")]
    InvalidRegion,
}

impl DmaError {
    /// True when the failure came from the allocator rather than the mapper.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, Self::OutOfMemory | Self::ZeroSize)
    }
}

/// Result type for DMA operations.
pub type Result<T> = core::result::Result<T, DmaError>;

// ============================================================================
// Mapping
// ============================================================================

/// Direction of a streaming DMA mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Device reads the memory (transmit).
    ToDevice,
    /// Device writes the memory (receive).
    FromDevice,
    /// Both directions (descriptor rings).
    Bidirectional,
}

/// Makes CPU memory addressable by a device.
///
/// Implementations must be callable from any polling context, so they are
/// `Send + Sync` and never block.
pub trait DmaMapper: Send + Sync {
    /// Map `len` bytes at `cpu` and return the bus address the device must use.
    ///
    /// On error nothing is left mapped.
    fn map(&self, cpu: NonNull<u8>, len: usize, dir: DmaDirection) -> Result<u64>;

    /// Tear down a mapping previously returned by [`DmaMapper::map`].
    fn unmap(&self, bus: u64, len: usize, dir: DmaDirection) -> Result<()>;
}

impl<T: DmaMapper + ?Sized> DmaMapper for alloc::sync::Arc<T> {
    fn map(&self, cpu: NonNull<u8>, len: usize, dir: DmaDirection) -> Result<u64> {
        (**self).map(cpu, len, dir)
    }

    fn unmap(&self, bus: u64, len: usize, dir: DmaDirection) -> Result<()> {
        (**self).unmap(bus, len, dir)
    }
}

// ============================================================================
// Tests
// ============================================================================
