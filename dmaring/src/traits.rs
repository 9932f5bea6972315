//! Collaborator interfaces.
//!
//! The engine owns rings and buffers; everything above it (packet
//! preparation, delivery, flow control) is reached through these traits.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::Result;
use crate::rx::RxPacket;

/// Outcome reported for every transmitted packet, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Device completed the transmission.
    Ok,
    /// Device reported an error for the packet.
    Failed,
    /// Packet was reclaimed without completing (flush, reset).
    Aborted,
}

/// Traffic class (software queue) a TX packet is accounted against.
pub type TxClass = u8;

/// A packet made of one or more byte frames the device reads in order.
///
/// # Safety
/// The memory behind every frame must stay at the same address while the
/// value is moved around, and must not change until the value is dropped.
/// The engine maps frame addresses once and hands the value back only after
/// the device is done with them.
pub unsafe trait TxFrames {
    /// Number of frames.
    fn frame_count(&self) -> usize;

    /// Frame `i`, `i < frame_count()`.
    fn frame(&self, i: usize) -> &[u8];
}

// SAFETY: heap storage does not move with the Vec header.
unsafe impl TxFrames for Vec<u8> {
    fn frame_count(&self) -> usize {
        1
    }

    fn frame(&self, _i: usize) -> &[u8] {
        self
    }
}

// SAFETY: boxed slices live on the heap.
unsafe impl TxFrames for Box<[u8]> {
    fn frame_count(&self) -> usize {
        1
    }

    fn frame(&self, _i: usize) -> &[u8] {
        self
    }
}

// SAFETY: each inner Vec keeps its own heap allocation.
unsafe impl TxFrames for Vec<Vec<u8>> {
    fn frame_count(&self) -> usize {
        self.len()
    }

    fn frame(&self, i: usize) -> &[u8] {
        &self[i]
    }
}

// SAFETY: static data never moves.
unsafe impl TxFrames for &'static [u8] {
    fn frame_count(&self) -> usize {
        1
    }

    fn frame(&self, _i: usize) -> &[u8] {
        self
    }
}

/// Upper-layer hooks for the transmit path.
///
/// Callbacks that report completions or flow control are invoked with no
/// ring lock held, so they may call back into the engine.
pub trait TxHandler<P> {
    /// Fill the per-packet control header and return the descriptor info word.
    ///
    /// `header` is `None` when the engine runs without a header cache.
    /// An error rejects the packet before anything is mapped.
    fn prepare(&mut self, qid: u16, packet: &mut P, header: Option<&mut [u8]>) -> Result<u32> {
        let _ = (qid, packet, header);
        Ok(0)
    }

    /// Ownership of `packet` returns to the originator.
    fn packet_done(&mut self, qid: u16, packet: P, status: TxStatus);

    /// Queue reached its stop threshold; stop feeding it.
    fn stop_queue(&mut self, qid: u16) {
        let _ = qid;
    }

    /// Queue drained below its stop threshold.
    fn wake_queue(&mut self, qid: u16) {
        let _ = qid;
    }
}

/// Upper-layer hooks for the receive path.
pub trait RxHandler {
    /// A complete packet. Ownership of its buffers moves to the handler.
    fn deliver(&mut self, qid: u16, packet: RxPacket);

    /// End of one drain pass (batch boundary).
    fn poll_complete(&mut self, qid: u16) {
        let _ = qid;
    }

    /// Poll loop finished under budget; interrupts may be re-enabled.
    fn rx_idle(&mut self, qid: u16) {
        let _ = qid;
    }

    /// A full ring's worth of consecutive corrupt descriptors was seen.
    fn ring_corrupted(&mut self, qid: u16) {
        let _ = qid;
    }
}
