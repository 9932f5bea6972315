//! MorpheusX DMA ring queue engine.
//!
//! Moves packets between software and a device over shared-memory
//! descriptor rings: buffers are handed to the device by flipping a
//! descriptor's ownership bit and come back when the device sets DMA_DONE.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           DmaEngine                              │
//! │   TxAccounting (per-class in-flight, idle condition)             │
//! │   HeaderCache (pre-mapped control headers)                       │
//! │                                                                  │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │  TxQueue ×N  │   │  RxQueue ×M  │   │  poll::poll_rx       │  │
//! │  │ enqueue      │   │ refill       │   │  budgeted drain loop │  │
//! │  │ reclaim      │   │ drain/reset  │   └──────────────────────┘  │
//! │  └──────┬───────┘   └──────┬───────┘                             │
//! │         └─────────┬────────┘                                     │
//! │            ┌──────▼──────┐      ┌────────────┐                   │
//! │            │  DescRing   │──────│ QueueRegs  │ doorbell / idx    │
//! │            │ HwDesc[]    │      └────────────┘                   │
//! │            │ Entry[]     │                                       │
//! │            └──────┬──────┘                                       │
//! │            ┌──────▼──────┐      ┌────────────┐                   │
//! │            │ BufferPool  │──────│ DmaMapper  │ (dma-pool)        │
//! │            └─────────────┘      └────────────┘                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use morpheus_dmaring::{DmaEngine, QueueConfig, SplitLenCodec, DEFAULT_POLL_BUDGET};
//!
//! let mut engine = DmaEngine::new(mapper, SplitLenCodec, 32);
//! let tx = engine.add_tx_queue(tx_regs, QueueConfig::default())?;
//! let rx = engine.add_rx_queue(rx_regs, QueueConfig::default())?;
//! engine.init()?;
//!
//! engine.tx_enqueue(tx, frame, Some(0), &mut upper).map_err(|e| e.into_error())?;
//! // interrupt fired:
//! let outcome = engine.poll_rx(rx, DEFAULT_POLL_BUDGET, &mut upper)?;
//! engine.poll_tx(&mut upper);
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod desc;
pub mod dma;
pub mod engine;
pub mod error;
pub mod poll;
pub mod regs;
pub mod ring;
pub mod rx;
pub mod state;
pub mod traits;
pub mod tx;
pub mod txwi;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(test)]
mod tests;

pub use config::QueueConfig;
pub use desc::{DescFields, DescriptorCodec, HwDesc, SplitLenCodec};
pub use dma::{BufferOwnership, BufferPool, DmaBuffer, DmaMapping, SharedBuffer};
pub use engine::{CleanupReport, DmaEngine, TxAccounting};
pub use error::{Result, RingError, TxEnqueueError};
pub use poll::{poll_rx, PollOutcome, DEFAULT_POLL_BUDGET};
pub use regs::{MmioQueueRegs, QueueRegBlock, QueueRegs};
pub use ring::{DescRing, Entry, EntryPayload, TxCompletion};
pub use rx::{RxFragment, RxPacket, RxQueue, RxStats};
pub use state::QueueState;
pub use traits::{RxHandler, TxClass, TxFrames, TxHandler, TxStatus};
pub use tx::{TxQueue, TxStats};
pub use txwi::HeaderCache;
