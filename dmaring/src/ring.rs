//! Descriptor ring.
//!
//! A fixed array of [`HwDesc`] in coherent memory plus a parallel array of
//! software [`Entry`] records. Software produces at `head`, consumes at
//! `tail`; `queued` is the distance between them. One slot always stays
//! empty so a full ring is distinguishable from an empty one.
//!
//! ```text
//!            tail                 head
//!             │                    │
//!   ┌───┬───┬─▼─┬───┬───┬───┬───┬──▼┬───┬───┐
//!   │   │   │ D │ D │ H │ H │ H │   │   │   │   D = done, H = with device
//!   └───┴───┴───┴───┴───┴───┴───┴───┴───┴───┘
//! ```

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use dma_pool::{CoherentRegion, DmaMapper, DMA_MASK_32};

use crate::desc::{DescFields, DescriptorCodec, HwDesc};
use crate::dma::{DmaBuffer, DmaMapping};
use crate::error::{Result, RingError};
use crate::regs::QueueRegs;
use crate::traits::TxClass;

/// Packet and control header handed back when a TX entry completes.
pub struct TxCompletion<P> {
    pub packet: P,
    /// Pre-mapped control header, returned to the header cache.
    pub header: Option<DmaBuffer>,
}

/// What a ring slot holds.
pub enum EntryPayload<P> {
    Vacant,
    /// A posted receive buffer.
    Rx(DmaBuffer),
    /// Up to two streaming segments, and on a packet's last descriptor its
    /// completion record.
    Tx {
        segments: [Option<DmaMapping>; 2],
        completion: Option<TxCompletion<P>>,
    },
}

/// Software record paired with one hardware descriptor.
pub struct Entry<P> {
    pub payload: EntryPayload<P>,
    /// buf0 of this descriptor is the control header, not a packet segment.
    pub skip_first_buffer: bool,
    /// Traffic class charged for the packet (last descriptor only).
    pub class: Option<TxClass>,
    /// Descriptor had DMA_DONE set when the entry was taken.
    pub done: bool,
}

impl<P> Entry<P> {
    pub const fn vacant() -> Self {
        Self {
            payload: EntryPayload::Vacant,
            skip_first_buffer: false,
            class: None,
            done: false,
        }
    }

    pub fn is_vacant(&self) -> bool {
        matches!(self.payload, EntryPayload::Vacant)
    }
}

/// One descriptor ring and its bookkeeping.
pub struct DescRing<P, C> {
    /// `None` once the ring has been released.
    region: Option<CoherentRegion>,
    entries: Vec<Entry<P>>,
    regs: Arc<dyn QueueRegs>,
    codec: C,
    size: u16,
    head: u16,
    tail: u16,
    queued: u16,
}

impl<P, C: DescriptorCodec> DescRing<P, C> {
    /// Allocate `size` descriptors, mark them all DMA_DONE, and program the
    /// queue registers.
    pub fn new(
        mapper: Arc<dyn DmaMapper>,
        regs: Arc<dyn QueueRegs>,
        codec: C,
        size: u16,
    ) -> Result<Self> {
        if size < 2 {
            return Err(RingError::InvalidConfig("ring_size must be at least 2"));
        }
        let region = CoherentRegion::new(mapper, size as usize * HwDesc::SIZE)?;
        let bus = region.bus_addr();
        if bus + region.len() as u64 - 1 > DMA_MASK_32 {
            return Err(RingError::MappingFailed);
        }

        let mut entries = Vec::new();
        entries.try_reserve_exact(size as usize).map_err(|_| RingError::OutOfMemory)?;
        entries.resize_with(size as usize, Entry::vacant);

        let mut ring = Self {
            region: Some(region),
            entries,
            regs,
            codec,
            size,
            head: 0,
            tail: 0,
            queued: 0,
        };

        let idle = ring.codec.encode(&DescFields {
            done: true,
            ..DescFields::default()
        });
        for d in ring.descs() {
            d.publish(0, 0, 0, idle);
        }

        ring.regs.set_ring_base(bus);
        ring.regs.set_ring_size(size as u32);
        ring.resync();

        log::debug!("ring: {} descriptors at bus {:#x}", size, bus);
        Ok(ring)
    }

    /// Descriptor array; empty once released.
    fn descs(&self) -> &[HwDesc] {
        let Some(region) = &self.region else {
            return &[];
        };
        // SAFETY: the region is page aligned, zero initialised, at least
        // `size * 16` bytes, and lives as long as `self`. HwDesc is all
        // atomics, so shared access from the device is sound.
        unsafe { core::slice::from_raw_parts(region.cpu_ptr().as_ptr() as *const HwDesc, self.size as usize) }
    }

    #[inline]
    fn desc(&self, idx: u16) -> Option<&HwDesc> {
        self.descs().get(idx as usize)
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn head(&self) -> u16 {
        self.head
    }

    pub fn tail(&self) -> u16 {
        self.tail
    }

    pub fn queued(&self) -> u16 {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Descriptors that can still be reserved.
    pub fn free(&self) -> u16 {
        self.size - 1 - self.queued
    }

    /// Bus address of descriptor 0, or 0 once released.
    pub fn bus_addr(&self) -> u64 {
        self.region.as_ref().map_or(0, |r| r.bus_addr())
    }

    /// Whether the descriptor memory has been freed.
    pub fn is_released(&self) -> bool {
        self.region.is_none()
    }

    /// Index following `idx`.
    #[inline]
    pub fn next(&self, idx: u16) -> u16 {
        (idx + 1) % self.size
    }

    /// Claim `n` consecutive descriptors starting at `head`.
    ///
    /// All or nothing: fails with [`RingError::QueueFull`] and leaves the
    /// ring untouched unless `queued + n < size`.
    pub fn reserve(&mut self, n: usize) -> Result<u16> {
        if self.region.is_none() {
            return Err(RingError::Shutdown);
        }
        if self.queued as usize + n >= self.size as usize {
            return Err(RingError::QueueFull {
                needed: n,
                free: self.free() as usize,
            });
        }
        let first = self.head;
        self.head = ((self.head as usize + n) % self.size as usize) as u16;
        self.queued += n as u16;
        Ok(first)
    }

    /// Fill descriptor `idx` and hand it to the device.
    ///
    /// DMA_DONE is always cleared; the control word is written last.
    pub fn write(&self, idx: u16, buf0: u32, buf1: u32, fields: DescFields, info: u32) {
        let ctrl = self.codec.encode(&DescFields { done: false, ..fields });
        if let Some(d) = self.desc(idx) {
            d.publish(buf0, buf1, info, ctrl);
        }
    }

    /// Whether the device has finished with descriptor `idx`.
    #[inline]
    pub fn is_ready(&self, idx: u16) -> bool {
        self.desc(idx).is_some_and(|d| self.codec.decode(d.load_ctrl()).done)
    }

    /// Decoded control word of descriptor `idx`.
    pub fn fields(&self, idx: u16) -> DescFields {
        self.desc(idx).map_or_else(DescFields::default, |d| self.codec.decode(d.load_ctrl()))
    }

    /// Info word of descriptor `idx`. Only meaningful once it is ready.
    pub fn info(&self, idx: u16) -> u32 {
        self.desc(idx).map_or(0, |d| d.info())
    }

    pub fn entry(&self, idx: u16) -> &Entry<P> {
        &self.entries[idx as usize]
    }

    pub fn entry_mut(&mut self, idx: u16) -> &mut Entry<P> {
        &mut self.entries[idx as usize]
    }

    /// Consume the entry at `tail` and advance.
    ///
    /// The caller decides whether the descriptor had to be ready; the
    /// returned entry records whether it was.
    pub fn take(&mut self) -> Option<Entry<P>> {
        if self.queued == 0 {
            return None;
        }
        let idx = self.tail;
        let done = self.is_ready(idx);
        let mut entry = core::mem::replace(&mut self.entries[idx as usize], Entry::vacant());
        entry.done = done;
        self.tail = self.next(idx);
        self.queued -= 1;
        Some(entry)
    }

    /// Realign both indices with the device's DMA index.
    pub fn resync(&mut self) {
        debug_assert_eq!(self.queued, 0, "resync with entries outstanding");
        let idx = (self.regs.dma_idx() % self.size as u32) as u16;
        self.head = idx;
        self.tail = idx;
        self.regs.set_cpu_idx(idx as u32);
    }

    /// Ring the doorbell with the current `head`.
    pub fn kick(&self) {
        fence(Ordering::SeqCst);
        self.regs.set_cpu_idx(self.head as u32);
    }

    /// Detach the ring from the device and free the descriptor memory.
    ///
    /// Every entry must already have been taken. Idempotent.
    pub fn release(&mut self) {
        debug_assert_eq!(self.queued, 0, "release with entries outstanding");
        if self.region.take().is_some() {
            self.regs.set_ring_base(0);
            self.regs.set_ring_size(0);
            log::debug!("ring: released {} descriptors", self.size);
        }
    }

    /// Clear DMA_DONE on every descriptor so stale completions are never
    /// mistaken for new ones.
    pub fn clear_done_all(&self) {
        for d in self.descs() {
            let fields = self.codec.decode(d.load_ctrl());
            d.set_ctrl(self.codec.encode(&DescFields { done: false, ..fields }));
        }
    }
}
