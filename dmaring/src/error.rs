//! Ring engine error types.

use core::fmt;

use dma_pool::DmaError;

pub type Result<T> = core::result::Result<T, RingError>;

/// Errors surfaced by the ring engine.
///
/// Every variant is recoverable: the operation that returned it has not
/// mutated the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    /// Buffer allocation failed (allocator empty or pool limit reached).
    #[error("out of memory")]
    OutOfMemory,
    /// The device cannot address the memory.
    #[error("DMA mapping failed")]
    MappingFailed,
    /// Not enough free descriptors for the whole request.
    #[error("queue full ({needed} descriptors needed, {free} free)")]
    QueueFull {
        /// Descriptors the request needed.
        needed: usize,
        /// Descriptors that were free.
        free: usize,
    },
    /// Packet has more segments than a single enqueue may carry.
    #[error("packet needs {0} segments")]
    TooManySegments(usize),
    /// A single segment is longer than a descriptor length field can express.
    #[error("segment of {0} bytes exceeds descriptor length field")]
    SegmentTooLarge(usize),
    /// The packet-preparation collaborator rejected the packet.
    #[error("packet preparation failed")]
    PrepareFailed,
    /// The queue is flushing or destroyed.
    #[error("queue is shut down")]
    Shutdown,
    /// No queue with this id.
    #[error("no queue with id {0}")]
    UnknownQueue(u16),
    /// Queue configuration is inconsistent.
    #[error("invalid queue configuration: {0}")]
    InvalidConfig(&'static str),
}

impl RingError {
    /// True for errors the caller should treat as backpressure
    /// (retry later or drop) rather than a broken request.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::OutOfMemory | Self::MappingFailed | Self::QueueFull { .. }
        )
    }

    /// True when the ring itself is the bottleneck, as opposed to memory.
    pub fn is_ring_full(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}

impl From<DmaError> for RingError {
    fn from(e: DmaError) -> Self {
        if e.is_allocation_failure() {
            Self::OutOfMemory
        } else {
            Self::MappingFailed
        }
    }
}

/// A rejected enqueue. Carries the packet back so the originator can free it.
pub struct TxEnqueueError<P> {
    /// Why the packet was rejected.
    pub error: RingError,
    /// The packet, untouched by the ring.
    pub packet: P,
}

impl<P> TxEnqueueError<P> {
    pub(crate) fn new(error: RingError, packet: P) -> Self {
        Self { error, packet }
    }

    /// Drop the packet and keep only the error.
    pub fn into_error(self) -> RingError {
        self.error
    }
}

impl<P> fmt::Debug for TxEnqueueError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxEnqueueError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<P> fmt::Display for TxEnqueueError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enqueue rejected: {}", self.error)
    }
}
