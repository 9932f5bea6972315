//! Coherent DMA regions.
//!
//! Page-aligned, zeroed memory that stays mapped for its whole lifetime.
//! Descriptor rings live in these.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::sync::Arc;
use core::ptr::NonNull;

use crate::{align_up, DmaDirection, DmaError, DmaMapper, Result, PAGE_SIZE};

/// A page-aligned, zero-initialised, bidirectionally mapped allocation.
///
/// Unmapped and freed on drop.
pub struct CoherentRegion {
    cpu: NonNull<u8>,
    bus: u64,
    len: usize,
    layout: Layout,
    mapper: Arc<dyn DmaMapper>,
}

impl CoherentRegion {
    /// Allocate and map at least `len` bytes.
    ///
    /// Returns [`DmaError::OutOfMemory`] if the allocation fails, or the
    /// mapper's error if mapping fails; either way nothing is left allocated.
    pub fn new(mapper: Arc<dyn DmaMapper>, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(DmaError::ZeroSize);
        }
        let size = align_up(len, PAGE_SIZE);
        let layout = Layout::from_size_align(size, PAGE_SIZE).map_err(|_| DmaError::InvalidRegion)?;

        // SAFETY: layout has non-zero size.
        let cpu = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(DmaError::OutOfMemory)?;

        let bus = match mapper.map(cpu, size, DmaDirection::Bidirectional) {
            Ok(bus) => bus,
            Err(e) => {
                // SAFETY: allocated above with the same layout, never shared.
                unsafe { dealloc(cpu.as_ptr(), layout) };
                return Err(e);
            }
        };

        Ok(Self {
            cpu,
            bus,
            len: size,
            layout,
            mapper,
        })
    }

    /// CPU pointer to the start of the region.
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        self.cpu
    }

    /// Device-visible bus address of the start of the region.
    pub fn bus_addr(&self) -> u64 {
        self.bus
    }

    /// Region length in bytes (a whole number of pages).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; regions are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Drop for CoherentRegion {
    fn drop(&mut self) {
        if let Err(e) = self.mapper.unmap(self.bus, self.len, DmaDirection::Bidirectional) {
            log::error!("coherent: failed to unmap region at {:#x}: {}", self.bus, e);
        }
        // SAFETY: allocated in `new` with this layout; the device no longer
        // references it after the unmap above.
        unsafe { dealloc(self.cpu.as_ptr(), self.layout) };
    }
}

// SAFETY: the region is a uniquely owned allocation; concurrent access to its
// contents is the caller's business (descriptor rings use atomics).
unsafe impl Send for CoherentRegion {}
unsafe impl Sync for CoherentRegion {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IovaMapper, MemoryRegion};

    #[test]
    fn test_region_is_page_aligned_and_zeroed() {
        let mapper = Arc::new(IovaMapper::new(MemoryRegion::new(0x4000_0000, 0x10_0000)));
        let region = CoherentRegion::new(mapper.clone(), 100).unwrap();

        assert_eq!(region.len(), PAGE_SIZE);
        assert_eq!(region.cpu_ptr().as_ptr() as usize % PAGE_SIZE, 0);
        let bytes = unsafe { core::slice::from_raw_parts(region.cpu_ptr().as_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(mapper.live_mappings(), 1);

        drop(region);
        assert_eq!(mapper.live_mappings(), 0);
    }

    #[test]
    fn test_mapping_failure_frees_allocation() {
        let mapper = Arc::new(IovaMapper::new(MemoryRegion::new(0x4000_0000, 0x1000)));
        mapper.set_mapping_limit(Some(0));
        assert_eq!(
            CoherentRegion::new(mapper.clone(), 64).err(),
            Some(DmaError::WindowExhausted)
        );
        assert_eq!(mapper.live_mappings(), 0);
    }
}
