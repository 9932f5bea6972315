//! Per-queue device registers.
//!
//! Every ring has four 32-bit registers: descriptor base, ring size, the CPU
//! index (doorbell) and the DMA index (where the device is).

use core::ptr::NonNull;

/// Register interface of one hardware queue.
pub trait QueueRegs: Send + Sync {
    /// Program the descriptor array's bus address.
    fn set_ring_base(&self, bus: u64);

    /// Program the number of descriptors.
    fn set_ring_size(&self, size: u32);

    /// Doorbell: tell the device how far software has produced.
    fn set_cpu_idx(&self, idx: u32);

    /// Where the device currently is.
    fn dma_idx(&self) -> u32;
}

/// Register block layout.
#[repr(C)]
pub struct QueueRegBlock {
    pub desc_base: u32,
    pub ring_size: u32,
    pub cpu_idx: u32,
    pub dma_idx: u32,
}

/// Offsets within a [`QueueRegBlock`].
pub mod offset {
    pub const DESC_BASE: usize = 0x00;
    pub const RING_SIZE: usize = 0x04;
    pub const CPU_IDX: usize = 0x08;
    pub const DMA_IDX: usize = 0x0C;
}

/// Memory-mapped queue registers.
pub struct MmioQueueRegs {
    base: NonNull<u32>,
}

impl MmioQueueRegs {
    /// # Safety
    /// `base` must point to a mapped, uncached [`QueueRegBlock`] that stays
    /// valid for the lifetime of this value.
    pub unsafe fn new(base: NonNull<QueueRegBlock>) -> Self {
        Self { base: base.cast() }
    }

    #[inline]
    fn reg(&self, off: usize) -> *mut u32 {
        // SAFETY: `off` is one of the block offsets, inside the mapping.
        unsafe { self.base.as_ptr().add(off / 4) }
    }

    #[inline]
    fn write(&self, off: usize, val: u32) {
        // SAFETY: see `new`.
        unsafe { core::ptr::write_volatile(self.reg(off), val) }
    }

    #[inline]
    fn read(&self, off: usize) -> u32 {
        // SAFETY: see `new`.
        unsafe { core::ptr::read_volatile(self.reg(off)) }
    }
}

impl QueueRegs for MmioQueueRegs {
    fn set_ring_base(&self, bus: u64) {
        debug_assert!(bus <= u32::MAX as u64, "ring base beyond 32-bit register");
        self.write(offset::DESC_BASE, bus as u32);
    }

    fn set_ring_size(&self, size: u32) {
        self.write(offset::RING_SIZE, size);
    }

    fn set_cpu_idx(&self, idx: u32) {
        self.write(offset::CPU_IDX, idx);
    }

    fn dma_idx(&self) -> u32 {
        self.read(offset::DMA_IDX)
    }
}

// SAFETY: MMIO registers may be touched from any context; each access is a
// single volatile 32-bit operation.
unsafe impl Send for MmioQueueRegs {}
unsafe impl Sync for MmioQueueRegs {}
