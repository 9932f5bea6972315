//! Control header cache.
//!
//! Many devices expect a small per-packet control header ahead of the
//! payload. Headers are mapped once and recycled through a device-wide free
//! list instead of being mapped and unmapped per packet.

use alloc::sync::Arc;
use alloc::vec::Vec;

use dma_pool::{DmaDirection, DmaMapper, DMA_MASK_32};
use spin::Mutex;

use crate::dma::DmaBuffer;
use crate::error::{Result, RingError};

/// Device-wide cache of pre-mapped control headers.
pub struct HeaderCache {
    mapper: Arc<dyn DmaMapper>,
    header_size: usize,
    free: Mutex<Vec<DmaBuffer>>,
}

impl HeaderCache {
    pub fn new(mapper: Arc<dyn DmaMapper>, header_size: usize) -> Self {
        Self {
            mapper,
            header_size,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// Take a mapped header, allocating a new one if the cache is empty.
    pub fn get(&self) -> Result<DmaBuffer> {
        if let Some(mut h) = self.free.lock().pop() {
            h.mark_allocated();
            return Ok(h);
        }
        let mut h = DmaBuffer::alloc(self.header_size)?;
        let bus = h.map(&self.mapper, DmaDirection::ToDevice)?;
        if bus + self.header_size as u64 - 1 > DMA_MASK_32 {
            return Err(RingError::MappingFailed);
        }
        Ok(h)
    }

    /// Return a header. It stays mapped.
    pub fn put(&self, mut header: DmaBuffer) {
        if header.is_device_owned() {
            // SAFETY: headers come back only with their descriptor reclaimed.
            unsafe { header.mark_driver_owned() };
        }
        header.mark_free();
        self.free.lock().push(header);
    }

    /// Unmap and free every cached header.
    pub fn drain(&self) -> usize {
        let mut free = self.free.lock();
        let n = free.len();
        free.clear();
        n
    }

    /// Headers currently cached.
    pub fn cached(&self) -> usize {
        self.free.lock().len()
    }
}
