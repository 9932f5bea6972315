//! Buffer pool management.
//!
//! One pool per queue. Hands out mapped, driver-owned buffers and takes them
//! back, keeping a bounded cache of unmapped allocations for reuse.

use alloc::sync::Arc;
use alloc::vec::Vec;

use dma_pool::{DmaDirection, DmaMapper, DMA_MASK_32};

use super::buffer::DmaBuffer;
use crate::error::{Result, RingError};

/// Per-queue buffer pool.
pub struct BufferPool {
    mapper: Arc<dyn DmaMapper>,
    /// Size of each buffer.
    buffer_size: usize,
    dir: DmaDirection,
    /// Maximum mapped buffers outstanding at once.
    limit: usize,
    /// Mapped buffers currently handed out.
    outstanding: usize,
    /// Unmapped buffers waiting for reuse.
    cache: Vec<DmaBuffer>,
    recycle_limit: usize,
}

impl BufferPool {
    /// Create a new buffer pool.
    ///
    /// # Arguments
    /// - `buffer_size`: Size of each buffer (RX: the configured `buf_size`)
    /// - `dir`: Direction every buffer is mapped with
    /// - `limit`: Maximum buffers mapped at once
    /// - `recycle_limit`: Maximum released buffers kept for reuse
    pub fn new(
        mapper: Arc<dyn DmaMapper>,
        buffer_size: usize,
        dir: DmaDirection,
        limit: usize,
        recycle_limit: usize,
    ) -> Self {
        Self {
            mapper,
            buffer_size,
            dir,
            limit,
            outstanding: 0,
            cache: Vec::with_capacity(recycle_limit),
            recycle_limit,
        }
    }

    /// Take a mapped, driver-owned buffer.
    ///
    /// Fails with [`RingError::OutOfMemory`] when the pool limit is reached
    /// or the allocator is empty, and with [`RingError::MappingFailed`] when
    /// the device cannot address the buffer. A failure leaves nothing mapped.
    pub fn acquire(&mut self) -> Result<DmaBuffer> {
        if self.outstanding >= self.limit {
            return Err(RingError::OutOfMemory);
        }

        let mut buf = match self.cache.pop() {
            Some(mut b) => {
                b.mark_allocated();
                b
            }
            None => DmaBuffer::alloc(self.buffer_size)?,
        };

        let bus = buf.map(&self.mapper, self.dir)?;
        // Descriptor address words are 32 bits wide.
        if bus + self.buffer_size as u64 - 1 > DMA_MASK_32 {
            log::warn!("pool: buffer mapped at {:#x} is beyond descriptor reach", bus);
            return Err(RingError::MappingFailed);
        }

        self.outstanding += 1;
        Ok(buf)
    }

    /// Return a buffer taken with [`acquire`](Self::acquire).
    ///
    /// Unmaps it. With `recycle`, the allocation is cached for reuse if it is
    /// not shared with an upper layer and the cache has room; otherwise it
    /// is freed.
    pub fn release(&mut self, mut buf: DmaBuffer, recycle: bool) {
        self.detach(&mut buf);
        if buf.is_device_owned() {
            // SAFETY: callers only release buffers whose descriptor has been
            // completed or whose ring has been reset.
            unsafe { buf.mark_driver_owned() };
        }

        if recycle
            && buf.ref_count() == 1
            && buf.capacity() == self.buffer_size
            && self.cache.len() < self.recycle_limit
        {
            buf.mark_free();
            self.cache.push(buf);
        }
    }

    /// Unmap a buffer that is leaving the pool for good (delivered upward).
    pub fn detach(&mut self, buf: &mut DmaBuffer) {
        if buf.unmap() {
            self.outstanding -= 1;
        }
    }

    /// Free every cached buffer.
    pub fn drain_cache(&mut self) -> usize {
        let n = self.cache.len();
        self.cache.clear();
        n
    }

    /// Mapped buffers currently handed out.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Unmapped buffers waiting for reuse.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
