//! DMA buffer management module.
//!
//! Provides ownership-tracked DMA buffers, RAII streaming mappings, and the
//! per-queue buffer pool.

pub mod buffer;
pub mod ownership;
pub mod pool;

pub use buffer::{DmaBuffer, DmaMapping, SharedBuffer, BUFFER_ALIGN};
pub use ownership::BufferOwnership;
pub use pool::BufferPool;
