//! Software device model.
//!
//! Plays the device side of a ring: walks descriptors from the DMA index
//! toward the CPU index, reading and writing them through the IOVA mapper
//! exactly as bus-master hardware would.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dma_pool::IovaMapper;

use crate::desc::{DescFields, DescriptorCodec, HwDesc, SplitLenCodec};
use crate::regs::QueueRegs;

/// Queue registers backed by plain atomics.
#[derive(Debug, Default)]
pub struct SimRegs {
    ring_base: AtomicU64,
    ring_size: AtomicU32,
    cpu_idx: AtomicU32,
    dma_idx: AtomicU32,
    kicks: AtomicU32,
}

impl SimRegs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ring_base(&self) -> u64 {
        self.ring_base.load(Ordering::Acquire)
    }

    pub fn ring_size(&self) -> u32 {
        self.ring_size.load(Ordering::Acquire)
    }

    pub fn cpu_idx(&self) -> u32 {
        self.cpu_idx.load(Ordering::Acquire)
    }

    pub fn set_dma_idx(&self, idx: u32) {
        self.dma_idx.store(idx, Ordering::Release);
    }

    /// Number of CPU index writes seen so far.
    pub fn kicks(&self) -> u32 {
        self.kicks.load(Ordering::Acquire)
    }
}

impl QueueRegs for SimRegs {
    fn set_ring_base(&self, bus: u64) {
        self.ring_base.store(bus, Ordering::Release);
    }

    fn set_ring_size(&self, size: u32) {
        self.ring_size.store(size, Ordering::Release);
    }

    fn set_cpu_idx(&self, idx: u32) {
        self.cpu_idx.store(idx, Ordering::Release);
        self.kicks.fetch_add(1, Ordering::AcqRel);
    }

    fn dma_idx(&self) -> u32 {
        self.dma_idx.load(Ordering::Acquire)
    }
}

/// Device side of one queue.
pub struct SimDevice<C: DescriptorCodec = SplitLenCodec> {
    mapper: Arc<IovaMapper>,
    regs: Arc<SimRegs>,
    codec: C,
}

impl SimDevice<SplitLenCodec> {
    pub fn new(mapper: Arc<IovaMapper>, regs: Arc<SimRegs>) -> Self {
        Self::with_codec(mapper, regs, SplitLenCodec)
    }
}

impl<C: DescriptorCodec> SimDevice<C> {
    pub fn with_codec(mapper: Arc<IovaMapper>, regs: Arc<SimRegs>, codec: C) -> Self {
        Self { mapper, regs, codec }
    }

    pub fn regs(&self) -> &Arc<SimRegs> {
        &self.regs
    }

    /// Descriptors posted by software and not yet processed.
    pub fn pending(&self) -> u32 {
        let size = self.regs.ring_size();
        if size == 0 {
            return 0;
        }
        (self.regs.cpu_idx() + size - self.regs.dma_idx()) % size
    }

    fn with_desc<R>(&self, idx: u32, f: impl FnOnce(&HwDesc) -> R) -> Option<R> {
        let bus = self.regs.ring_base() + idx as u64 * HwDesc::SIZE as u64;
        let ptr = self.mapper.translate(bus)?;
        // SAFETY: `bus` lies inside the live ring mapping, which holds
        // 16-byte aligned descriptors made of atomics.
        Some(f(unsafe { &*(ptr.as_ptr() as *const HwDesc) }))
    }

    fn advance(&self) {
        let size = self.regs.ring_size();
        let next = (self.regs.dma_idx() + 1) % size;
        self.regs.set_dma_idx(next);
    }

    /// Complete up to `n` posted TX descriptors. Returns how many.
    pub fn complete_tx(&self, n: usize) -> usize {
        let mut done = 0;
        while done < n && self.pending() > 0 {
            let idx = self.regs.dma_idx();
            let ok = self.with_desc(idx, |d| {
                let fields = self.codec.decode(d.load_ctrl());
                d.set_ctrl(self.codec.encode(&DescFields { done: true, ..fields }));
            });
            if ok.is_none() {
                break;
            }
            self.advance();
            done += 1;
        }
        done
    }

    /// Complete every posted TX descriptor.
    pub fn complete_all(&self) -> usize {
        self.complete_tx(usize::MAX)
    }

    /// Receive one buffer's worth of `data` into the next posted RX
    /// descriptor. `last` marks the end of the packet.
    ///
    /// Data beyond the posted buffer length is dropped, but the reported
    /// length is always `data.len()`. Returns false if no descriptor is
    /// posted.
    pub fn receive_frame(&self, data: &[u8], last: bool) -> bool {
        self.receive(Some(data), data.len(), last)
    }

    /// Complete the next RX descriptor reporting `len` bytes without
    /// writing any payload.
    pub fn receive_len(&self, len: usize, last: bool) -> bool {
        self.receive(None, len, last)
    }

    /// Receive `data` split into `chunk`-byte descriptors. Returns the
    /// number of descriptors used.
    pub fn receive_packet(&self, data: &[u8], chunk: usize) -> usize {
        let mut used = 0;
        let mut chunks = data.chunks(chunk).peekable();
        while let Some(c) = chunks.next() {
            if !self.receive_frame(c, chunks.peek().is_none()) {
                break;
            }
            used += 1;
        }
        used
    }

    fn receive(&self, data: Option<&[u8]>, len: usize, last: bool) -> bool {
        if self.pending() == 0 {
            return false;
        }
        let idx = self.regs.dma_idx();
        let ok = self.with_desc(idx, |d| {
            let posted = self.codec.decode(d.load_ctrl());
            if let Some(data) = data {
                let n = data.len().min(posted.len0 as usize);
                if let Some(dst) = self.mapper.translate(d.buf0() as u64) {
                    // SAFETY: buf0 is inside a live FromDevice mapping of at
                    // least `posted.len0` bytes.
                    unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), dst.as_ptr(), n) };
                }
            }
            d.set_ctrl(self.codec.encode(&DescFields {
                len0: len.min(u16::MAX as usize) as u16,
                len1: 0,
                last0: last,
                last1: false,
                done: true,
            }));
        });
        if ok.is_none() {
            return false;
        }
        self.advance();
        true
    }
}
