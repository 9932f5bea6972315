//! DMA buffer with ownership tracking.
//!
//! A [`DmaBuffer`] is a heap allocation plus, while it is posted to a ring,
//! a streaming [`DmaMapping`]. Mappings unmap themselves when dropped, so a
//! buffer can never leak a live bus address.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::sync::Arc;
use core::ptr::NonNull;

use dma_pool::{DmaDirection, DmaError, DmaMapper};

use super::ownership::BufferOwnership;

/// Alignment of every buffer allocation (one cache line).
pub const BUFFER_ALIGN: usize = 64;

// ═══════════════════════════════════════════════════════════════════════════
// STREAMING MAPPING
// ═══════════════════════════════════════════════════════════════════════════

/// A live streaming DMA mapping. Unmapped on drop.
pub struct DmaMapping {
    mapper: Arc<dyn DmaMapper>,
    bus: u64,
    len: usize,
    dir: DmaDirection,
}

impl DmaMapping {
    /// Map `len` bytes at `cpu` for the device.
    ///
    /// # Safety
    /// `cpu..cpu+len` must stay allocated and must not move for as long as
    /// the returned mapping lives.
    pub unsafe fn new(
        mapper: &Arc<dyn DmaMapper>,
        cpu: NonNull<u8>,
        len: usize,
        dir: DmaDirection,
    ) -> Result<Self, DmaError> {
        let bus = mapper.map(cpu, len, dir)?;
        Ok(Self {
            mapper: Arc::clone(mapper),
            bus,
            len,
            dir,
        })
    }

    /// Map a byte slice for transmission.
    ///
    /// # Safety
    /// `data` must outlive the mapping and must not move while it is live.
    pub unsafe fn for_slice(mapper: &Arc<dyn DmaMapper>, data: &[u8]) -> Result<Self, DmaError> {
        let cpu = NonNull::new(data.as_ptr() as *mut u8).ok_or(DmaError::ZeroSize)?;
        Self::new(mapper, cpu, data.len(), DmaDirection::ToDevice)
    }

    /// Device-visible address of the first byte.
    pub fn bus(&self) -> u64 {
        self.bus
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn direction(&self) -> DmaDirection {
        self.dir
    }
}

impl Drop for DmaMapping {
    fn drop(&mut self) {
        if let Err(e) = self.mapper.unmap(self.bus, self.len, self.dir) {
            log::error!("dma: unmap of {:#x} (+{}) failed: {}", self.bus, self.len, e);
        }
    }
}

impl core::fmt::Debug for DmaMapping {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaMapping")
            .field("bus", &format_args!("{:#x}", self.bus))
            .field("len", &self.len)
            .field("dir", &self.dir)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKING STORAGE
// ═══════════════════════════════════════════════════════════════════════════

struct Storage {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Storage {
    fn alloc(size: usize) -> Result<Self, DmaError> {
        if size == 0 {
            return Err(DmaError::ZeroSize);
        }
        let layout = Layout::from_size_align(size, BUFFER_ALIGN).map_err(|_| DmaError::OutOfMemory)?;
        // SAFETY: non-zero size checked above.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(DmaError::OutOfMemory)?;
        Ok(Self { ptr, layout })
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        // SAFETY: allocated in `alloc` with this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// SAFETY: plain heap memory; access is gated by `DmaBuffer` ownership.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

// ═══════════════════════════════════════════════════════════════════════════
// DMA BUFFER
// ═══════════════════════════════════════════════════════════════════════════

/// A single DMA buffer with ownership tracking.
///
/// Tracks the CPU allocation, the bus mapping (if any), and ownership state.
pub struct DmaBuffer {
    storage: Arc<Storage>,
    mapping: Option<DmaMapping>,
    capacity: usize,
    ownership: BufferOwnership,
}

impl DmaBuffer {
    /// Allocate an unmapped, zeroed, driver-owned buffer.
    pub fn alloc(capacity: usize) -> Result<Self, DmaError> {
        Ok(Self {
            storage: Arc::new(Storage::alloc(capacity)?),
            mapping: None,
            capacity,
            ownership: BufferOwnership::DriverOwned,
        })
    }

    /// Map the whole buffer for the device. No-op if already mapped.
    ///
    /// Returns the bus address.
    pub fn map(&mut self, mapper: &Arc<dyn DmaMapper>, dir: DmaDirection) -> Result<u64, DmaError> {
        if let Some(m) = &self.mapping {
            return Ok(m.bus());
        }
        // SAFETY: storage is heap memory owned by this buffer (via the Arc),
        // which outlives the mapping stored alongside it.
        let mapping = unsafe { DmaMapping::new(mapper, self.storage.ptr, self.capacity, dir)? };
        let bus = mapping.bus();
        self.mapping = Some(mapping);
        Ok(bus)
    }

    /// Drop the bus mapping. Returns whether one was live.
    pub fn unmap(&mut self) -> bool {
        self.mapping.take().is_some()
    }

    /// Get the device-visible bus address, if mapped.
    pub fn bus_addr(&self) -> Option<u64> {
        self.mapping.as_ref().map(DmaMapping::bus)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Get the CPU pointer.
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        self.storage.ptr
    }

    /// Get buffer capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get buffer data as slice.
    ///
    /// # Panics
    /// Panics if buffer is not DriverOwned.
    pub fn as_slice(&self) -> &[u8] {
        assert!(
            self.ownership.can_access(),
            "BUG: Cannot access buffer not owned by driver (state: {:?})",
            self.ownership
        );
        // SAFETY: driver-owned, so the device is not writing; storage is
        // `capacity` bytes.
        unsafe { core::slice::from_raw_parts(self.storage.ptr.as_ptr(), self.capacity) }
    }

    /// Get buffer data as mutable slice.
    ///
    /// # Panics
    /// Panics if buffer is not DriverOwned or has been shared upward.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        assert!(
            self.ownership.can_access(),
            "BUG: Cannot access buffer not owned by driver (state: {:?})",
            self.ownership
        );
        assert!(
            Arc::strong_count(&self.storage) == 1,
            "BUG: Cannot mutate a shared buffer"
        );
        // SAFETY: driver-owned and unshared.
        unsafe { core::slice::from_raw_parts_mut(self.storage.ptr.as_ptr(), self.capacity) }
    }

    /// Hand out a read-only reference to the buffer contents that outlives
    /// this handle. A shared buffer is never recycled.
    pub fn share(&self) -> SharedBuffer {
        SharedBuffer {
            storage: Arc::clone(&self.storage),
            capacity: self.capacity,
        }
    }

    /// Number of live references to the underlying storage.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.storage)
    }

    /// Get current ownership state.
    pub fn ownership(&self) -> BufferOwnership {
        self.ownership
    }

    /// Check if buffer can be allocated.
    pub fn is_free(&self) -> bool {
        self.ownership.is_free()
    }

    /// Check if buffer is owned by driver.
    pub fn is_driver_owned(&self) -> bool {
        self.ownership.can_access()
    }

    /// Check if buffer is owned by device.
    pub fn is_device_owned(&self) -> bool {
        self.ownership.is_device_owned()
    }

    /// Mark buffer as allocated (Free -> DriverOwned).
    pub(crate) fn mark_allocated(&mut self) {
        debug_assert!(self.ownership.is_free(), "Buffer must be free to allocate");
        self.ownership = BufferOwnership::DriverOwned;
    }

    /// Mark buffer as device-owned (DriverOwned -> DeviceOwned).
    ///
    /// # Safety
    /// Only call immediately before publishing its descriptor to the device.
    pub unsafe fn mark_device_owned(&mut self) {
        debug_assert!(
            self.ownership == BufferOwnership::DriverOwned,
            "Buffer must be driver-owned before device transfer"
        );
        self.ownership = BufferOwnership::DeviceOwned;
    }

    /// Mark buffer as driver-owned (DeviceOwned -> DriverOwned).
    ///
    /// # Safety
    /// Only call after the device has completed the descriptor, or after
    /// the ring has been reset so the device can no longer reach it.
    pub unsafe fn mark_driver_owned(&mut self) {
        debug_assert!(
            self.ownership == BufferOwnership::DeviceOwned,
            "Buffer must be device-owned before reclaim"
        );
        self.ownership = BufferOwnership::DriverOwned;
    }

    /// Mark buffer as free (DriverOwned -> Free).
    pub(crate) fn mark_free(&mut self) {
        debug_assert!(
            self.ownership == BufferOwnership::DriverOwned,
            "Buffer must be driver-owned before freeing"
        );
        self.ownership = BufferOwnership::Free;
    }
}

impl core::fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("capacity", &self.capacity)
            .field("bus", &self.bus_addr())
            .field("ownership", &self.ownership)
            .finish()
    }
}

/// Read-only view of a buffer delivered to an upper layer.
#[derive(Clone)]
pub struct SharedBuffer {
    storage: Arc<Storage>,
    capacity: usize,
}

impl SharedBuffer {
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the buffer was unmapped before sharing could outlive the
        // ring entry, and mutable access is refused while shared.
        unsafe { core::slice::from_raw_parts(self.storage.ptr.as_ptr(), self.capacity) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
