//! IOVA window mapper.
//!
//! Hands out device bus addresses from a fixed window and remembers which
//! CPU range each one stands for, the way an IOMMU domain does. Every live
//! mapping is tracked, so leaks and double unmaps are observable.
//!
//! # Window layout
//! ```text
//!   window.base                                    window.end()
//!   │ map A │ gap │ map B │ map C │        free          │
//! ```
//! Allocation is first-fit over the gaps between live mappings.

use alloc::collections::BTreeMap;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::{align_up, DmaDirection, DmaError, DmaMapper, MemoryRegion, Result};

/// Bus address alignment of every mapping (one cache line).
pub const IOVA_ALIGN: usize = 64;

const NO_LIMIT: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Mapping {
    cpu: usize,
    len: usize,
    dir: DmaDirection,
}

/// Bus-address allocator over a fixed IOVA window.
pub struct IovaMapper {
    window: MemoryRegion,
    mappings: Mutex<BTreeMap<u64, Mapping>>,
    /// Maximum number of simultaneous mappings (`NO_LIMIT` if unbounded).
    limit: AtomicUsize,
}

impl IovaMapper {
    /// Create a mapper that allocates from `window`.
    pub fn new(window: MemoryRegion) -> Self {
        Self {
            window,
            mappings: Mutex::new(BTreeMap::new()),
            limit: AtomicUsize::new(NO_LIMIT),
        }
    }

    /// Bound the number of simultaneous mappings. `None` removes the bound.
    ///
    /// Once the bound is reached `map` fails with [`DmaError::WindowExhausted`].
    pub fn set_mapping_limit(&self, limit: Option<usize>) {
        self.limit.store(limit.unwrap_or(NO_LIMIT), Ordering::Relaxed);
    }

    /// The bus window this mapper allocates from.
    pub fn window(&self) -> MemoryRegion {
        self.window
    }

    /// Number of live mappings.
    pub fn live_mappings(&self) -> usize {
        self.mappings.lock().len()
    }

    /// Total bytes currently mapped.
    pub fn mapped_bytes(&self) -> usize {
        self.mappings.lock().values().map(|m| m.len).sum()
    }

    /// Translate a bus address inside a live mapping back to CPU memory.
    pub fn translate(&self, bus: u64) -> Option<NonNull<u8>> {
        let mappings = self.mappings.lock();
        let (&start, m) = mappings.range(..=bus).next_back()?;
        let offset = (bus - start) as usize;
        if offset >= m.len {
            return None;
        }
        NonNull::new((m.cpu + offset) as *mut u8)
    }

    /// Check whether `bus` is the start of a live mapping.
    pub fn is_mapped(&self, bus: u64) -> bool {
        self.mappings.lock().contains_key(&bus)
    }

    fn find_gap(&self, mappings: &BTreeMap<u64, Mapping>, len: usize) -> Option<u64> {
        let mut cursor = align_up(self.window.base, IOVA_ALIGN);
        for (&start, m) in mappings.iter() {
            let start = start as usize;
            if cursor.checked_add(len)? <= start {
                return Some(cursor as u64);
            }
            cursor = align_up(start + m.len, IOVA_ALIGN);
        }
        if self.window.contains(cursor, len) {
            Some(cursor as u64)
        } else {
            None
        }
    }
}

impl DmaMapper for IovaMapper {
    fn map(&self, cpu: NonNull<u8>, len: usize, dir: DmaDirection) -> Result<u64> {
        if len == 0 {
            return Err(DmaError::ZeroSize);
        }

        let mut mappings = self.mappings.lock();
        if mappings.len() >= self.limit.load(Ordering::Relaxed) {
            return Err(DmaError::WindowExhausted);
        }

        let bus = self.find_gap(&mappings, len).ok_or(DmaError::WindowExhausted)?;
        mappings.insert(
            bus,
            Mapping {
                cpu: cpu.as_ptr() as usize,
                len,
                dir,
            },
        );
        Ok(bus)
    }

    fn unmap(&self, bus: u64, len: usize, dir: DmaDirection) -> Result<()> {
        let mut mappings = self.mappings.lock();
        match mappings.get(&bus) {
            Some(m) if m.len == len => {
                if m.dir != dir {
                    log::warn!(
                        "iova: unmap of {:#x} with direction {:?}, mapped as {:?}",
                        bus,
                        dir,
                        m.dir
                    );
                }
                mappings.remove(&bus);
                Ok(())
            }
            _ => Err(DmaError::NotMapped(bus)),
        }
    }
}
