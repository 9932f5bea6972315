//! Queue configuration.

use crate::error::{Result, RingError};

/// Default number of descriptors per ring.
pub const DEFAULT_RING_SIZE: u16 = 256;

/// Default RX buffer size (2KB).
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Default distance from a full ring at which TX backpressure kicks in.
pub const DEFAULT_STOP_MARGIN: u16 = 8;

/// Default maximum number of mapped segments per transmitted packet
/// (including the control header).
pub const DEFAULT_MAX_TX_SEGMENTS: usize = 8;

/// Default maximum number of buffers a received packet may span.
pub const DEFAULT_MAX_RX_FRAGMENTS: usize = 17;

/// Default bound on the buffer reuse cache.
pub const DEFAULT_RECYCLE_LIMIT: usize = 64;

/// Per-queue configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of descriptors (N). One slot always stays free.
    pub ring_size: u16,
    /// Size of each RX buffer in bytes.
    pub buf_size: usize,
    /// Headroom before packet data in every RX buffer.
    pub buf_offset: usize,
    /// Tail room kept free in the first (linear) buffer of a packet.
    pub head_reserve: usize,
    /// TX queue stops when `queued >= ring_size - stop_margin`.
    pub stop_margin: u16,
    /// Maximum mapped segments per TX packet.
    pub max_tx_segments: usize,
    /// Maximum buffers per RX packet.
    pub max_rx_fragments: usize,
    /// Maximum buffers kept for reuse after release.
    pub recycle_limit: usize,
    /// Maximum mapped buffers the queue's pool hands out (`None`: ring size).
    pub pool_limit: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ring_size: DEFAULT_RING_SIZE,
            buf_size: DEFAULT_BUFFER_SIZE,
            buf_offset: 0,
            head_reserve: 0,
            stop_margin: DEFAULT_STOP_MARGIN,
            max_tx_segments: DEFAULT_MAX_TX_SEGMENTS,
            max_rx_fragments: DEFAULT_MAX_RX_FRAGMENTS,
            recycle_limit: DEFAULT_RECYCLE_LIMIT,
            pool_limit: None,
        }
    }
}

impl QueueConfig {
    pub fn with_ring_size(mut self, ring_size: u16) -> Self {
        self.ring_size = ring_size;
        self
    }

    pub fn with_buf_size(mut self, buf_size: usize) -> Self {
        self.buf_size = buf_size;
        self
    }

    pub fn with_buf_offset(mut self, buf_offset: usize) -> Self {
        self.buf_offset = buf_offset;
        self
    }

    pub fn with_head_reserve(mut self, head_reserve: usize) -> Self {
        self.head_reserve = head_reserve;
        self
    }

    pub fn with_stop_margin(mut self, stop_margin: u16) -> Self {
        self.stop_margin = stop_margin;
        self
    }

    pub fn with_max_tx_segments(mut self, max: usize) -> Self {
        self.max_tx_segments = max;
        self
    }

    pub fn with_max_rx_fragments(mut self, max: usize) -> Self {
        self.max_rx_fragments = max;
        self
    }

    pub fn with_recycle_limit(mut self, limit: usize) -> Self {
        self.recycle_limit = limit;
        self
    }

    pub fn with_pool_limit(mut self, limit: usize) -> Self {
        self.pool_limit = Some(limit);
        self
    }

    /// Queue depth at or above which a TX queue is marked stopped.
    pub fn stop_threshold(&self) -> u16 {
        self.ring_size - self.stop_margin
    }

    /// Bytes the device may write into one RX buffer.
    pub fn rx_desc_len(&self) -> usize {
        self.buf_size - self.head_reserve - self.buf_offset
    }

    /// Bytes available to the first buffer of a received packet.
    pub fn linear_capacity(&self) -> usize {
        self.buf_size - self.head_reserve
    }

    /// Mapped buffers the pool may have outstanding.
    pub fn effective_pool_limit(&self) -> usize {
        self.pool_limit.unwrap_or(self.ring_size as usize)
    }

    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.ring_size < 2 {
            return Err(RingError::InvalidConfig("ring_size must be at least 2"));
        }
        if self.buf_size == 0 {
            return Err(RingError::InvalidConfig("buf_size must be non-zero"));
        }
        if self.buf_offset + self.head_reserve >= self.buf_size {
            return Err(RingError::InvalidConfig("buf_offset + head_reserve must be below buf_size"));
        }
        if self.max_tx_segments == 0 {
            return Err(RingError::InvalidConfig("max_tx_segments must be non-zero"));
        }
        if self.max_rx_fragments == 0 {
            return Err(RingError::InvalidConfig("max_rx_fragments must be non-zero"));
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus the checks only a TX queue needs.
    pub fn validate_tx(&self) -> Result<()> {
        self.validate()?;
        if self.stop_margin == 0 || self.stop_margin >= self.ring_size {
            return Err(RingError::InvalidConfig("stop_margin must be in 1..ring_size"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = QueueConfig::default();
        assert!(cfg.validate_tx().is_ok());
        assert_eq!(cfg.stop_threshold(), 248);
        assert_eq!(cfg.effective_pool_limit(), 256);
    }

    #[test]
    fn test_rejects_bad_margins() {
        let cfg = QueueConfig::default().with_ring_size(8).with_stop_margin(8);
        assert!(cfg.validate().is_ok());
        assert!(matches!(cfg.validate_tx(), Err(RingError::InvalidConfig(_))));

        let cfg = QueueConfig::default().with_ring_size(1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_headroom_overflow() {
        let cfg = QueueConfig::default()
            .with_buf_size(256)
            .with_buf_offset(128)
            .with_head_reserve(128);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rx_lengths() {
        let cfg = QueueConfig::default()
            .with_buf_size(2048)
            .with_buf_offset(32)
            .with_head_reserve(320);
        assert_eq!(cfg.rx_desc_len(), 2048 - 320 - 32);
        assert_eq!(cfg.linear_capacity(), 2048 - 320);
    }
}
