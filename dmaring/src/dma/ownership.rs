//! Buffer ownership state machine.
//!
//! # State Machine
//! ```text
//!     FREE ──acquire()──> DRIVER_OWNED ──write()──> DEVICE_OWNED
//!       ▲                     │                         │
//!       └────release()────────┴────────take()───────────┘
//! ```
//!
//! INVARIANT: Accessing DEVICE_OWNED buffer is instant UB.

/// Who may touch a buffer's memory right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwnership {
    /// Sitting in a reuse cache.
    Free,
    /// Owned by software; CPU access allowed.
    DriverOwned,
    /// Handed to the device through a descriptor.
    DeviceOwned,
}

impl BufferOwnership {
    /// Check if buffer can be handed out.
    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }

    /// Check if the CPU may read or write the buffer.
    pub fn can_access(&self) -> bool {
        matches!(self, Self::DriverOwned)
    }

    /// Check if the device currently owns the buffer.
    pub fn is_device_owned(&self) -> bool {
        matches!(self, Self::DeviceOwned)
    }
}
