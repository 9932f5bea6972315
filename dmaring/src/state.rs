//! Per-queue lifecycle.
//!
//! ```text
//!  Uninitialized ──arm──> Armed ⇄ Draining
//!                           │
//!                        flush()
//!                           ▼
//!                        Flushing ──destroy──> Destroyed
//! ```

/// Lifecycle state of a single queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Ring allocated, nothing posted yet.
    Uninitialized,
    /// Descriptors posted, doorbell enabled.
    Armed,
    /// A poll pass is walking completions.
    Draining,
    /// Shutdown in progress; every outstanding entry is being reclaimed.
    Flushing,
    /// Ring released.
    Destroyed,
}

impl QueueState {
    /// Whether new `enqueue`/`refill` work may be accepted.
    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Armed | Self::Draining)
    }

    /// Whether the queue is on its way out.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Flushing | Self::Destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_states_reject_work() {
        assert!(QueueState::Armed.accepts_work());
        assert!(QueueState::Draining.accepts_work());
        assert!(!QueueState::Flushing.accepts_work());
        assert!(!QueueState::Destroyed.accepts_work());
        assert!(QueueState::Flushing.is_shutdown());
    }
}
