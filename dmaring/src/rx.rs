//! RX queue.
//!
//! Keeps the ring stocked with empty buffers and turns completed
//! descriptors back into packets.
//!
//! # Reassembly
//! A packet may span several descriptors. Every descriptor but the last has
//! its LAST flag clear; buffers are accumulated in an [`RxPacket`] until the
//! terminating descriptor arrives. A reported length that cannot fit the
//! buffer, or more fragments than a packet may hold, discards the whole
//! accumulator along with the packet's remaining descriptors.
//!
//! # Contract
//! `drain` and `refill` run from one polling context per queue; the queue
//! takes `&mut self` and needs no lock.

use alloc::sync::Arc;
use alloc::vec::Vec;

use dma_pool::{DmaDirection, DmaMapper};

use crate::config::QueueConfig;
use crate::desc::{DescFields, DescriptorCodec};
use crate::dma::{BufferPool, DmaBuffer};
use crate::error::{Result, RingError};
use crate::regs::QueueRegs;
use crate::ring::{DescRing, EntryPayload};
use crate::state::QueueState;
use crate::traits::RxHandler;

// ═══════════════════════════════════════════════════════════════════════════
// PACKETS
// ═══════════════════════════════════════════════════════════════════════════

/// One received buffer and the part of it holding packet data.
pub struct RxFragment {
    buf: DmaBuffer,
    offset: usize,
    len: usize,
}

impl RxFragment {
    /// Packet bytes carried by this fragment.
    pub fn data(&self) -> &[u8] {
        &self.buf.as_slice()[self.offset..self.offset + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the data within the buffer (the configured headroom).
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The underlying buffer, e.g. to [`share`](DmaBuffer::share) it.
    pub fn buffer(&self) -> &DmaBuffer {
        &self.buf
    }

    pub fn into_buffer(self) -> DmaBuffer {
        self.buf
    }
}

/// A reassembled packet.
pub struct RxPacket {
    frags: Vec<RxFragment>,
    len: usize,
    info: u32,
}

impl RxPacket {
    fn new(info: u32, capacity: usize) -> Self {
        Self {
            frags: Vec::with_capacity(capacity),
            len: 0,
            info,
        }
    }

    fn push(&mut self, frag: RxFragment) {
        self.len += frag.len;
        self.frags.push(frag);
    }

    /// Total packet length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Info word of the first descriptor.
    pub fn info(&self) -> u32 {
        self.info
    }

    pub fn fragments(&self) -> &[RxFragment] {
        &self.frags
    }

    /// Whether the packet fit in a single buffer.
    pub fn is_linear(&self) -> bool {
        self.frags.len() == 1
    }

    pub fn into_fragments(self) -> Vec<RxFragment> {
        self.frags
    }

    /// Copy the packet into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for f in &self.frags {
            out.extend_from_slice(f.data());
        }
        out
    }
}

/// RX statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxStats {
    /// Packets delivered.
    pub packets: u64,
    /// Bytes delivered.
    pub bytes: u64,
    /// Descriptors consumed as fragments of multi-buffer packets.
    pub fragments: u64,
    /// Descriptors dropped as corrupt.
    pub corrupt: u64,
    /// Trailing descriptors of a corrupt packet, dropped unexamined.
    pub dropped: u64,
    /// Refill passes that could not fill a single descriptor.
    pub refill_failures: u64,
    /// Drains that ended with no buffer posted at all.
    pub starved: u64,
    /// Full queue resets.
    pub resets: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// RX QUEUE
// ═══════════════════════════════════════════════════════════════════════════

/// One receive ring with its buffer pool.
pub struct RxQueue<C> {
    qid: u16,
    ring: DescRing<(), C>,
    pool: BufferPool,
    config: QueueConfig,
    state: QueueState,
    /// Packet being reassembled.
    partial: Option<RxPacket>,
    /// Skipping the remaining descriptors of a corrupt packet.
    discarding: bool,
    /// Consecutive corrupt descriptors.
    corrupt_run: usize,
    stats: RxStats,
}

impl<C: DescriptorCodec> RxQueue<C> {
    /// Allocate the ring and program the queue registers. No buffers are
    /// posted until [`refill`](Self::refill).
    pub fn new(
        qid: u16,
        mapper: Arc<dyn DmaMapper>,
        regs: Arc<dyn QueueRegs>,
        codec: C,
        config: QueueConfig,
    ) -> Result<Self> {
        config.validate()?;
        if config.rx_desc_len() > codec.max_segment_len() {
            return Err(RingError::InvalidConfig("RX buffer longer than descriptor length field"));
        }

        let pool = BufferPool::new(
            Arc::clone(&mapper),
            config.buf_size,
            DmaDirection::FromDevice,
            config.effective_pool_limit(),
            config.recycle_limit,
        );
        let ring = DescRing::new(mapper, regs, codec, config.ring_size)?;

        log::debug!("rx{}: {} descriptors, {} byte buffers", qid, config.ring_size, config.buf_size);

        Ok(Self {
            qid,
            ring,
            pool,
            config,
            state: QueueState::Uninitialized,
            partial: None,
            discarding: false,
            corrupt_run: 0,
            stats: RxStats::default(),
        })
    }

    pub fn qid(&self) -> u16 {
        self.qid
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn stats(&self) -> RxStats {
        self.stats
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn ring(&self) -> &DescRing<(), C> {
        &self.ring
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Buffers currently posted.
    pub fn queued(&self) -> u16 {
        self.ring.queued()
    }

    /// Whether a multi-buffer packet is half assembled.
    pub fn has_partial(&self) -> bool {
        self.partial.is_some()
    }

    /// Post empty buffers until the ring holds `N - 1`.
    ///
    /// Rings the doorbell once for the whole batch. Running out of buffers
    /// part way is not an error; an error is returned only when nothing
    /// could be posted while the ring had room.
    pub fn refill(&mut self) -> Result<usize> {
        if !self.state.accepts_work() {
            return Err(RingError::Shutdown);
        }

        let desc_len = self.config.rx_desc_len() as u16;
        let offset = self.config.buf_offset as u64;
        let mut filled = 0usize;
        let mut failure = None;

        while self.ring.free() > 0 {
            let mut buf = match self.pool.acquire() {
                Ok(b) => b,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            let Some(bus) = buf.bus_addr() else {
                self.pool.release(buf, false);
                failure = Some(RingError::MappingFailed);
                break;
            };
            let idx = match self.ring.reserve(1) {
                Ok(idx) => idx,
                Err(e) => {
                    self.pool.release(buf, true);
                    failure = Some(e);
                    break;
                }
            };

            // SAFETY: the descriptor is published right below.
            unsafe { buf.mark_device_owned() };
            self.ring.entry_mut(idx).payload = EntryPayload::Rx(buf);
            self.ring
                .write(idx, (bus + offset) as u32, 0, DescFields::single(desc_len, false), 0);
            filled += 1;
        }

        if filled > 0 {
            self.ring.kick();
        }
        if self.state == QueueState::Uninitialized {
            self.state = QueueState::Armed;
        }

        match failure {
            Some(e) if filled == 0 => {
                self.stats.refill_failures += 1;
                log::trace!("rx{}: refill failed: {}", self.qid, e);
                Err(e)
            }
            _ => Ok(filled),
        }
    }

    /// Consume completed descriptors and deliver up to `budget` packets.
    ///
    /// Returns the number of packets delivered. Always refills afterwards.
    pub fn drain<H: RxHandler + ?Sized>(&mut self, budget: usize, handler: &mut H) -> usize {
        if self.state.is_shutdown() {
            return 0;
        }
        self.state = QueueState::Draining;

        let mut done = 0;
        while done < budget && !self.ring.is_empty() && self.ring.is_ready(self.ring.tail()) {
            let idx = self.ring.tail();
            let fields = self.ring.fields(idx);
            let info = self.ring.info(idx);
            let Some(entry) = self.ring.take() else {
                break;
            };

            let more = !fields.last0;
            let mut buf = match entry.payload {
                EntryPayload::Rx(buf) => buf,
                _ => {
                    log::warn!("rx{}: completed descriptor {} has no buffer", self.qid, idx);
                    self.drop_partial(more);
                    self.corrupt(handler);
                    continue;
                }
            };
            // SAFETY: DMA_DONE was observed with Acquire ordering above.
            unsafe { buf.mark_driver_owned() };

            let len = fields.len0 as usize;
            let offset = self.config.buf_offset;

            if self.discarding {
                self.stats.dropped += 1;
                self.pool.release(buf, true);
                self.discarding = more;
                continue;
            }

            // The first buffer of a packet keeps `head_reserve` bytes free.
            let capacity = if self.partial.is_some() {
                self.config.buf_size
            } else {
                self.config.linear_capacity()
            };
            let fragments = self.partial.as_ref().map_or(0, |p| p.frags.len());

            if len + offset > capacity || fragments >= self.config.max_rx_fragments {
                log::warn!(
                    "rx{}: dropping packet, descriptor {} reports {} bytes (capacity {}, {} fragments)",
                    self.qid,
                    idx,
                    len,
                    capacity,
                    fragments
                );
                self.pool.release(buf, true);
                self.drop_partial(more);
                self.corrupt(handler);
                continue;
            }

            self.corrupt_run = 0;
            self.pool.detach(&mut buf);
            let frag = RxFragment { buf, offset, len };

            let mut packet = match self.partial.take() {
                Some(p) => {
                    self.stats.fragments += 1;
                    p
                }
                None => {
                    let cap = if more { self.config.max_rx_fragments } else { 1 };
                    RxPacket::new(info, cap)
                }
            };
            packet.push(frag);

            if more {
                self.partial = Some(packet);
                continue;
            }

            self.stats.packets += 1;
            self.stats.bytes += packet.len() as u64;
            handler.deliver(self.qid, packet);
            done += 1;
        }

        self.state = QueueState::Armed;
        if let Err(e) = self.refill() {
            if self.ring.is_empty() {
                self.stats.starved += 1;
                log::warn!("rx{}: no buffers posted after drain: {}", self.qid, e);
            }
        }
        done
    }

    /// Abandon the packet being assembled. With `more`, the descriptors
    /// still belonging to it are skipped as they complete.
    fn drop_partial(&mut self, more: bool) {
        if let Some(p) = self.partial.take() {
            self.release_packet(p);
        }
        self.discarding = more;
    }

    fn corrupt<H: RxHandler + ?Sized>(&mut self, handler: &mut H) {
        self.stats.corrupt += 1;
        self.corrupt_run += 1;
        if self.corrupt_run == self.ring.size() as usize {
            log::error!(
                "rx{}: {} consecutive corrupt descriptors, device needs attention",
                self.qid,
                self.corrupt_run
            );
            handler.ring_corrupted(self.qid);
        }
    }

    /// Buffers of a dropped packet were already unmapped; recycle them.
    fn release_packet(&mut self, packet: RxPacket) {
        for f in packet.frags {
            self.pool.release(f.buf, true);
        }
    }

    /// Release every posted buffer without waiting for the device.
    fn abandon_all(&mut self) -> usize {
        let mut n = 0;
        while let Some(entry) = self.ring.take() {
            if let EntryPayload::Rx(buf) = entry.payload {
                self.pool.release(buf, true);
                n += 1;
            }
        }
        if let Some(p) = self.partial.take() {
            self.release_packet(p);
        }
        self.discarding = false;
        self.corrupt_run = 0;
        n
    }

    /// Full queue reset: forget every posted buffer and completion, then
    /// resynchronise with the device and repost.
    pub fn reset(&mut self) -> Result<usize> {
        if self.state.is_shutdown() {
            return Err(RingError::Shutdown);
        }
        self.ring.clear_done_all();
        let dropped = self.abandon_all();
        self.ring.resync();
        self.stats.resets += 1;
        log::debug!("rx{}: reset, {} buffers dropped", self.qid, dropped);
        self.refill()
    }

    /// Shut the queue down, releasing every posted buffer.
    ///
    /// Idempotent: a second call releases nothing.
    pub fn flush(&mut self) -> usize {
        if self.state.is_shutdown() {
            return 0;
        }
        self.state = QueueState::Flushing;
        let n = self.abandon_all();
        self.ring.resync();
        self.pool.drain_cache();
        log::debug!("rx{}: flushed {} buffers", self.qid, n);
        n
    }

    /// Flush the queue if needed, then free its descriptor memory.
    pub fn destroy(&mut self) {
        self.flush();
        self.ring.release();
        self.state = QueueState::Destroyed;
    }

    /// Whether the last drain left the device with no buffer to fill.
    pub fn is_starved(&self) -> bool {
        matches!(self.state, QueueState::Armed | QueueState::Draining) && self.ring.is_empty()
    }
}
