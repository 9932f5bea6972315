//! TX queue.
//!
//! # Flow
//! ```text
//! enqueue ─> header ─> prepare ─> map segments ─> lock ─> reserve ─> write ─> kick
//!                                     │                     │
//!                                     └── fail: unmap all ──┴──> packet returned
//!
//! reclaim ─> lock ─> take while DMA_DONE ─> unlock ─> packet_done / wake_queue
//! ```
//!
//! The queue lock serialises `enqueue` against `reclaim`; collaborator
//! callbacks always run after it is released.

use alloc::sync::Arc;
use alloc::vec::Vec;

use dma_pool::{DmaMapper, DMA_MASK_32};
use spin::Mutex;

use crate::config::QueueConfig;
use crate::desc::{DescFields, DescriptorCodec};
use crate::dma::{DmaBuffer, DmaMapping};
use crate::engine::{TxAccounting, MAX_TX_QUEUES};
use crate::error::{RingError, TxEnqueueError};
use crate::regs::QueueRegs;
use crate::ring::{DescRing, EntryPayload, TxCompletion};
use crate::state::QueueState;
use crate::traits::{TxClass, TxFrames, TxHandler, TxStatus};
use crate::txwi::HeaderCache;

/// TX statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStats {
    /// Packets accepted by `enqueue`/`enqueue_raw`.
    pub packets: u64,
    /// Descriptors written.
    pub descriptors: u64,
    /// Packets completed successfully.
    pub completed: u64,
    /// Packets the device reported as failed.
    pub failed: u64,
    /// Packets reclaimed by a forced flush.
    pub aborted: u64,
    /// Enqueues rejected for lack of descriptors.
    pub queue_full: u64,
    /// Times the queue was stopped.
    pub stops: u64,
    /// Times the queue was woken.
    pub wakes: u64,
}

struct TxInner<P, C> {
    ring: DescRing<P, C>,
    state: QueueState,
    /// Flow-controlled: upper layer told to stop feeding.
    stopped: bool,
    stats: TxStats,
}

/// A segment ready to be written into a descriptor half.
struct Segment {
    bus: u32,
    len: u16,
    mapping: Option<DmaMapping>,
}

/// One transmit ring.
pub struct TxQueue<P, C> {
    qid: u16,
    inner: Mutex<TxInner<P, C>>,
    mapper: Arc<dyn DmaMapper>,
    headers: Option<Arc<HeaderCache>>,
    config: QueueConfig,
    max_segment_len: usize,
}

impl<P: TxFrames, C: DescriptorCodec> TxQueue<P, C> {
    /// Allocate the ring and program the queue registers.
    ///
    /// With `headers`, every packet sent through [`enqueue`](Self::enqueue)
    /// is prefixed with a control header from the cache.
    pub fn new(
        qid: u16,
        mapper: Arc<dyn DmaMapper>,
        regs: Arc<dyn QueueRegs>,
        codec: C,
        config: QueueConfig,
        headers: Option<Arc<HeaderCache>>,
    ) -> crate::Result<Self> {
        config.validate_tx()?;
        if qid as usize >= MAX_TX_QUEUES {
            return Err(RingError::InvalidConfig("TX queue id beyond the busy set"));
        }
        let max_segment_len = codec.max_segment_len();
        if let Some(h) = &headers {
            if h.header_size() > max_segment_len {
                return Err(RingError::InvalidConfig("control header longer than a segment"));
            }
            if config.max_tx_segments < 2 {
                return Err(RingError::InvalidConfig("max_tx_segments leaves no room for payload"));
            }
        }

        let ring = DescRing::new(Arc::clone(&mapper), regs, codec, config.ring_size)?;
        log::debug!("tx{}: {} descriptors", qid, config.ring_size);

        Ok(Self {
            qid,
            inner: Mutex::new(TxInner {
                ring,
                state: QueueState::Armed,
                stopped: false,
                stats: TxStats::default(),
            }),
            mapper,
            headers,
            config,
            max_segment_len,
        })
    }

    pub fn qid(&self) -> u16 {
        self.qid
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Descriptors in flight.
    pub fn queued(&self) -> u16 {
        self.inner.lock().ring.queued()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> TxStats {
        self.inner.lock().stats
    }

    /// `(head, tail, queued)` snapshot.
    pub fn indices(&self) -> (u16, u16, u16) {
        let inner = self.inner.lock();
        (inner.ring.head(), inner.ring.tail(), inner.ring.queued())
    }

    /// Ring the doorbell with the current head.
    pub fn kick(&self) {
        self.inner.lock().ring.kick();
    }

    /// Queue a packet for transmission.
    ///
    /// # Arguments
    /// - `packet`: frames to send; handed back through `packet_done`
    /// - `class`: traffic class to account the packet against
    ///
    /// # Returns
    /// - `Ok(idx)`: index of the packet's last descriptor
    /// - `Err(e)`: nothing was mapped or written; `e.packet` is the
    ///   caller's again
    pub fn enqueue<H: TxHandler<P> + ?Sized>(
        &self,
        mut packet: P,
        class: Option<TxClass>,
        accounting: &TxAccounting,
        handler: &mut H,
    ) -> Result<u16, TxEnqueueError<P>> {
        if !self.inner.lock().state.accepts_work() {
            return Err(TxEnqueueError::new(RingError::Shutdown, packet));
        }

        let mut header = match &self.headers {
            Some(cache) => match cache.get() {
                Ok(h) => Some(h),
                Err(e) => return Err(TxEnqueueError::new(e, packet)),
            },
            None => None,
        };

        let info = match handler.prepare(self.qid, &mut packet, header.as_mut().map(|h| h.as_mut_slice())) {
            Ok(info) => info,
            Err(e) => {
                self.return_header(header);
                return Err(TxEnqueueError::new(e, packet));
            }
        };

        let reserved = usize::from(header.is_some());
        let mut segments = match self.map_frames(&packet, reserved) {
            Ok(s) => s,
            Err(e) => {
                self.return_header(header);
                return Err(TxEnqueueError::new(e, packet));
            }
        };
        if let Some(h) = &header {
            // Mapped on creation and checked against the 32-bit limit.
            let bus = h.bus_addr().unwrap_or_default();
            segments.insert(
                0,
                Segment {
                    bus: bus as u32,
                    len: h.capacity() as u16,
                    mapping: None,
                },
            );
        }

        let (idx, stop) = self.submit(packet, header, segments, info, class, true, accounting)?;
        if stop {
            handler.stop_queue(self.qid);
        }
        Ok(idx)
    }

    /// Queue a single-buffer frame with a caller-supplied info word and no
    /// control header. No traffic class is charged and no backpressure is
    /// applied; used for management and firmware frames.
    pub fn enqueue_raw(
        &self,
        packet: P,
        info: u32,
        accounting: &TxAccounting,
    ) -> Result<u16, TxEnqueueError<P>> {
        if !self.inner.lock().state.accepts_work() {
            return Err(TxEnqueueError::new(RingError::Shutdown, packet));
        }
        let segments = match self.map_frames(&packet, 0) {
            Ok(s) if s.len() == 1 => s,
            Ok(s) => return Err(TxEnqueueError::new(RingError::TooManySegments(s.len()), packet)),
            Err(e) => return Err(TxEnqueueError::new(e, packet)),
        };
        let (idx, _) = self.submit(packet, None, segments, info, None, false, accounting)?;
        Ok(idx)
    }

    fn return_header(&self, header: Option<DmaBuffer>) {
        if let (Some(cache), Some(h)) = (&self.headers, header) {
            cache.put(h);
        }
    }

    /// Map every non-empty frame. All or nothing: on error every mapping
    /// made so far is dropped, which unmaps it.
    fn map_frames(&self, packet: &P, reserved: usize) -> crate::Result<Vec<Segment>> {
        let frames = (0..packet.frame_count())
            .map(|i| packet.frame(i))
            .filter(|f| !f.is_empty());
        let count = frames.clone().count();
        if count == 0 {
            return Err(RingError::PrepareFailed);
        }
        if count + reserved > self.config.max_tx_segments {
            return Err(RingError::TooManySegments(count + reserved));
        }

        let mut segments = Vec::with_capacity(count + reserved);
        for frame in frames {
            if frame.len() > self.max_segment_len {
                return Err(RingError::SegmentTooLarge(frame.len()));
            }
            // SAFETY: `TxFrames` guarantees frame memory is stable until the
            // packet is dropped, and the packet outlives the mapping in the
            // ring entry.
            let mapping = unsafe { DmaMapping::for_slice(&self.mapper, frame)? };
            if mapping.bus() + frame.len() as u64 - 1 > DMA_MASK_32 {
                return Err(RingError::MappingFailed);
            }
            segments.push(Segment {
                bus: mapping.bus() as u32,
                len: frame.len() as u16,
                mapping: Some(mapping),
            });
        }
        Ok(segments)
    }

    /// Reserve, write and kick. Returns the last descriptor index and
    /// whether the queue just crossed its stop threshold. Without
    /// `flow_control` the threshold is not checked.
    #[allow(clippy::too_many_arguments)]
    fn submit(
        &self,
        packet: P,
        mut header: Option<DmaBuffer>,
        segments: Vec<Segment>,
        info: u32,
        class: Option<TxClass>,
        flow_control: bool,
        accounting: &TxAccounting,
    ) -> Result<(u16, bool), TxEnqueueError<P>> {
        let n = segments.len();
        let ndesc = n.div_ceil(2);

        let mut inner = self.inner.lock();
        if !inner.state.accepts_work() {
            drop(inner);
            self.return_header(header);
            return Err(TxEnqueueError::new(RingError::Shutdown, packet));
        }
        let first = match inner.ring.reserve(ndesc) {
            Ok(idx) => idx,
            Err(e) => {
                inner.stats.queue_full += 1;
                drop(inner);
                drop(segments);
                self.return_header(header);
                return Err(TxEnqueueError::new(e, packet));
            }
        };

        if let Some(h) = header.as_mut() {
            // SAFETY: its descriptor is published below, under the lock.
            unsafe { h.mark_device_owned() };
        }

        let mut completion = Some(TxCompletion { packet, header });
        let mut segs = segments.into_iter();
        let mut idx = first;
        let mut last = first;
        for d in 0..ndesc {
            let i = d * 2;
            // `ndesc` was computed from `n`, so the first half always exists.
            let Some(s0) = segs.next() else { break };
            let s1 = if i + 1 < n { segs.next() } else { None };

            let fields = DescFields {
                len0: s0.len,
                len1: s1.as_ref().map_or(0, |s| s.len),
                last0: i == n - 1,
                last1: i + 2 == n,
                done: false,
            };
            let buf1 = s1.as_ref().map_or(0, |s| s.bus);
            let is_last = d + 1 == ndesc;

            let entry = inner.ring.entry_mut(idx);
            entry.skip_first_buffer = s0.mapping.is_none();
            entry.class = if is_last { class } else { None };
            entry.done = false;
            entry.payload = EntryPayload::Tx {
                segments: [s0.mapping, s1.and_then(|s| s.mapping)],
                completion: if is_last { completion.take() } else { None },
            };
            inner.ring.write(idx, s0.bus, buf1, fields, info);

            last = idx;
            idx = inner.ring.next(idx);
        }

        if let Some(class) = class {
            accounting.charge(class);
        }
        accounting.mark_busy(self.qid);

        inner.stats.packets += 1;
        inner.stats.descriptors += ndesc as u64;

        let mut stop = false;
        if flow_control && !inner.stopped && inner.ring.queued() >= self.config.stop_threshold() {
            inner.stopped = true;
            inner.stats.stops += 1;
            stop = true;
            log::debug!("tx{}: stopped at {} queued", self.qid, inner.ring.queued());
        }

        inner.ring.kick();
        Ok((last, stop))
    }

    /// Walk completed descriptors from `tail` and release them.
    ///
    /// With `force`, every outstanding descriptor is released whether or
    /// not the device finished it, and the ring is resynchronised with the
    /// device afterwards. Returns the number of descriptors reclaimed.
    pub fn reclaim<H: TxHandler<P> + ?Sized>(
        &self,
        force: bool,
        accounting: &TxAccounting,
        handler: &mut H,
    ) -> usize {
        let mut finished: Vec<(P, TxStatus)> = Vec::new();
        let mut reclaimed = 0;
        let wake;
        {
            let mut inner = self.inner.lock();
            while !inner.ring.is_empty() {
                let idx = inner.ring.tail();
                if !force && !inner.ring.is_ready(idx) {
                    break;
                }
                let fields = inner.ring.fields(idx);
                let info = inner.ring.info(idx);
                let Some(entry) = inner.ring.take() else {
                    break;
                };
                reclaimed += 1;

                if let Some(class) = entry.class {
                    accounting.release(class);
                }
                let EntryPayload::Tx { segments, completion } = entry.payload else {
                    continue;
                };
                debug_assert!(!entry.skip_first_buffer || segments[0].is_none());
                drop(segments);

                let Some(TxCompletion { packet, header }) = completion else {
                    continue;
                };
                let status = if entry.done {
                    inner.ring.codec().tx_status(&fields, info)
                } else {
                    TxStatus::Aborted
                };
                match status {
                    TxStatus::Ok => inner.stats.completed += 1,
                    TxStatus::Failed => inner.stats.failed += 1,
                    TxStatus::Aborted => inner.stats.aborted += 1,
                }
                self.return_header(header);
                finished.push((packet, status));
            }

            if force {
                inner.ring.resync();
                inner.stopped = false;
            }
            if inner.ring.is_empty() {
                accounting.mark_idle(self.qid);
            }

            wake = !force && inner.stopped && inner.ring.queued() < self.config.stop_threshold();
            if wake {
                inner.stopped = false;
                inner.stats.wakes += 1;
                log::debug!("tx{}: woken at {} queued", self.qid, inner.ring.queued());
            }
        }

        for (packet, status) in finished {
            handler.packet_done(self.qid, packet, status);
        }
        if wake {
            handler.wake_queue(self.qid);
        }
        reclaimed
    }

    /// Shut the queue down and release every outstanding descriptor.
    ///
    /// Idempotent: a second call reclaims nothing.
    pub fn flush<H: TxHandler<P> + ?Sized>(&self, accounting: &TxAccounting, handler: &mut H) -> usize {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_shutdown() {
                return 0;
            }
            inner.state = QueueState::Flushing;
        }
        let n = self.reclaim(true, accounting, handler);
        log::debug!("tx{}: flushed {} descriptors", self.qid, n);
        n
    }

    /// Flush the queue if needed, then free its descriptor memory.
    pub fn destroy<H: TxHandler<P> + ?Sized>(&self, accounting: &TxAccounting, handler: &mut H) {
        self.flush(accounting, handler);
        let mut inner = self.inner.lock();
        inner.ring.release();
        inner.state = QueueState::Destroyed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::SplitLenCodec;
    use crate::sim::{SimDevice, SimRegs};
    use alloc::vec;
    use dma_pool::{IovaMapper, MemoryRegion};

    #[derive(Default)]
    struct Upper {
        done: Vec<(Vec<Vec<u8>>, TxStatus)>,
        stops: usize,
        wakes: usize,
        headers_seen: usize,
    }

    impl TxHandler<Vec<Vec<u8>>> for Upper {
        fn prepare(&mut self, _qid: u16, _p: &mut Vec<Vec<u8>>, header: Option<&mut [u8]>) -> crate::Result<u32> {
            if let Some(h) = header {
                h.fill(0xEE);
                self.headers_seen += 1;
            }
            Ok(0x1234)
        }

        fn packet_done(&mut self, _qid: u16, packet: Vec<Vec<u8>>, status: TxStatus) {
            self.done.push((packet, status));
        }

        fn stop_queue(&mut self, _qid: u16) {
            self.stops += 1;
        }

        fn wake_queue(&mut self, _qid: u16) {
            self.wakes += 1;
        }
    }

    struct Rig {
        iova: Arc<IovaMapper>,
        dev: SimDevice,
        tx: TxQueue<Vec<Vec<u8>>, SplitLenCodec>,
        acct: TxAccounting,
    }

    fn rig(cfg: QueueConfig, header: Option<usize>) -> Rig {
        let iova = Arc::new(IovaMapper::new(MemoryRegion::new(0x1000_0000, 0x100_0000)));
        let regs = Arc::new(SimRegs::new());
        let headers = header.map(|size| Arc::new(HeaderCache::new(iova.clone(), size)));
        let tx = TxQueue::new(1, iova.clone(), regs.clone(), SplitLenCodec, cfg, headers).unwrap();
        let dev = SimDevice::new(iova.clone(), regs);
        Rig {
            iova,
            dev,
            tx,
            acct: TxAccounting::new(),
        }
    }

    fn frames(sizes: &[usize]) -> Vec<Vec<u8>> {
        sizes.iter().map(|&s| vec![0xAB; s]).collect()
    }

    #[test]
    fn test_segments_pack_two_per_descriptor() {
        let r = rig(QueueConfig::default().with_ring_size(16), None);
        let mut up = Upper::default();
        let last = r.tx.enqueue(frames(&[100, 200, 300]), Some(0), &r.acct, &mut up).unwrap();
        assert_eq!(last, 1);
        assert_eq!(r.tx.queued(), 2);
        assert_eq!(r.iova.live_mappings(), 1 + 3);
        assert_eq!(r.acct.queued(0), 1);

        let inner = r.tx.inner.lock();
        let f0 = inner.ring.fields(0);
        assert_eq!((f0.len0, f0.len1, f0.last0, f0.last1), (100, 200, false, false));
        let f1 = inner.ring.fields(1);
        assert_eq!((f1.len0, f1.len1, f1.last0, f1.last1), (300, 0, true, false));
        assert_eq!(inner.ring.info(1), 0x1234);
        assert!(inner.ring.entry(0).class.is_none());
        assert_eq!(inner.ring.entry(1).class, Some(0));
    }

    #[test]
    fn test_even_segment_count_sets_last1() {
        let r = rig(QueueConfig::default().with_ring_size(16), None);
        let mut up = Upper::default();
        r.tx.enqueue(frames(&[10, 20]), None, &r.acct, &mut up).unwrap();
        let inner = r.tx.inner.lock();
        let f = inner.ring.fields(0);
        assert!(!f.last0);
        assert!(f.last1);
    }

    #[test]
    fn test_header_prefixed_and_recycled() {
        let r = rig(QueueConfig::default().with_ring_size(16), Some(32));
        let mut up = Upper::default();
        r.tx.enqueue(frames(&[1500]), Some(2), &r.acct, &mut up).unwrap();
        assert_eq!(up.headers_seen, 1);
        {
            let inner = r.tx.inner.lock();
            assert!(inner.ring.entry(0).skip_first_buffer);
            let f = inner.ring.fields(0);
            assert_eq!((f.len0, f.len1, f.last1), (32, 1500, true));
        }

        r.dev.complete_all();
        assert_eq!(r.tx.reclaim(false, &r.acct, &mut up), 1);
        assert_eq!(up.done.len(), 1);
        assert_eq!(up.done[0].1, TxStatus::Ok);
        // ring + cached header
        assert_eq!(r.iova.live_mappings(), 2);
        assert_eq!(r.acct.queued(2), 0);
    }

    #[test]
    fn test_oversized_segment_rejected_without_mapping() {
        let r = rig(QueueConfig::default().with_ring_size(16), None);
        let mut up = Upper::default();
        let err = r.tx.enqueue(frames(&[100, 20_000]), None, &r.acct, &mut up).unwrap_err();
        assert_eq!(err.error, RingError::SegmentTooLarge(20_000));
        assert_eq!(err.packet.len(), 2);
        assert_eq!(r.iova.live_mappings(), 1);
        assert_eq!(r.tx.queued(), 0);
    }

    #[test]
    fn test_too_many_segments() {
        let cfg = QueueConfig::default().with_ring_size(16).with_max_tx_segments(2);
        let r = rig(cfg, None);
        let mut up = Upper::default();
        let err = r.tx.enqueue(frames(&[1, 1, 1]), None, &r.acct, &mut up).unwrap_err();
        assert_eq!(err.into_error(), RingError::TooManySegments(3));
    }

    #[test]
    fn test_mapping_failure_unwinds() {
        let r = rig(QueueConfig::default().with_ring_size(16), None);
        let mut up = Upper::default();
        r.iova.set_mapping_limit(Some(3));
        let err = r.tx.enqueue(frames(&[10, 10, 10]), None, &r.acct, &mut up).unwrap_err();
        assert_eq!(err.error, RingError::MappingFailed);
        assert_eq!(r.iova.live_mappings(), 1);
        assert_eq!(r.tx.queued(), 0);
        assert_eq!(r.acct.queued(0), 0);
    }

    #[test]
    fn test_reclaim_stops_at_first_pending() {
        let r = rig(QueueConfig::default().with_ring_size(16), None);
        let mut up = Upper::default();
        for _ in 0..3 {
            r.tx.enqueue(frames(&[64]), Some(1), &r.acct, &mut up).unwrap();
        }
        assert_eq!(r.dev.complete_tx(2), 2);
        assert_eq!(r.tx.reclaim(false, &r.acct, &mut up), 2);
        assert_eq!(r.tx.queued(), 1);
        assert_eq!(r.acct.queued(1), 1);
        assert!(r.acct.any_pending());

        r.dev.complete_all();
        assert_eq!(r.tx.reclaim(false, &r.acct, &mut up), 1);
        assert!(!r.acct.any_pending());
        assert_eq!(r.tx.stats().completed, 3);
    }

    #[test]
    fn test_raw_frame() {
        let r = rig(QueueConfig::default().with_ring_size(16), Some(32));
        r.tx.enqueue_raw(frames(&[300]), 0xBEEF, &r.acct).unwrap();
        let inner = r.tx.inner.lock();
        assert!(!inner.ring.entry(0).skip_first_buffer);
        assert_eq!(inner.ring.fields(0).len0, 300);
        assert!(inner.ring.fields(0).last0);
        assert_eq!(inner.ring.info(0), 0xBEEF);
        drop(inner);

        let err = r.tx.enqueue_raw(frames(&[1, 2]), 0, &r.acct).unwrap_err();
        assert_eq!(err.error, RingError::TooManySegments(2));
    }

    #[test]
    fn test_raw_frames_leave_flow_control_alone() {
        let r = rig(QueueConfig::default().with_ring_size(32), None);
        let mut up = Upper::default();
        for _ in 0..24 {
            r.tx.enqueue_raw(frames(&[64]), 0, &r.acct).unwrap();
        }
        assert!(!r.tx.is_stopped());
        assert_eq!(r.tx.stats().stops, 0);

        // first regular packet above the threshold stops the queue
        r.tx.enqueue(frames(&[64]), Some(0), &r.acct, &mut up).unwrap();
        assert_eq!(up.stops, 1);
        assert!(r.tx.is_stopped());

        r.dev.complete_all();
        r.tx.reclaim(false, &r.acct, &mut up);
        assert_eq!((up.stops, up.wakes), (1, 1));
        assert_eq!(r.tx.stats().stops, r.tx.stats().wakes);
    }

    /// Reports a failed transmission when bit 31 of the info word is set.
    #[derive(Debug, Clone, Copy, Default)]
    struct ErrBitCodec;

    impl DescriptorCodec for ErrBitCodec {
        fn encode(&self, fields: &DescFields) -> u32 {
            SplitLenCodec.encode(fields)
        }

        fn decode(&self, ctrl: u32) -> DescFields {
            SplitLenCodec.decode(ctrl)
        }

        fn max_segment_len(&self) -> usize {
            SplitLenCodec::MAX_LEN
        }

        fn tx_status(&self, _fields: &DescFields, info: u32) -> TxStatus {
            if info & (1 << 31) != 0 {
                TxStatus::Failed
            } else {
                TxStatus::Ok
            }
        }
    }

    #[test]
    fn test_codec_reports_failed_completion() {
        let iova = Arc::new(IovaMapper::new(MemoryRegion::new(0x1000_0000, 0x100_0000)));
        let regs = Arc::new(SimRegs::new());
        let cfg = QueueConfig::default().with_ring_size(16);
        let tx: TxQueue<Vec<Vec<u8>>, ErrBitCodec> =
            TxQueue::new(0, iova.clone(), regs.clone(), ErrBitCodec, cfg, None).unwrap();
        let dev = SimDevice::with_codec(iova, regs, ErrBitCodec);
        let acct = TxAccounting::new();
        let mut up = Upper::default();

        tx.enqueue_raw(frames(&[64]), 1 << 31, &acct).unwrap();
        tx.enqueue_raw(frames(&[64]), 0, &acct).unwrap();
        assert_eq!(dev.complete_all(), 2);
        assert_eq!(tx.reclaim(false, &acct, &mut up), 2);

        let statuses: Vec<TxStatus> = up.done.iter().map(|(_, s)| *s).collect();
        assert_eq!(statuses, vec![TxStatus::Failed, TxStatus::Ok]);
        assert_eq!(tx.stats().failed, 1);
        assert_eq!(tx.stats().completed, 1);
    }

    #[test]
    fn test_queue_id_beyond_busy_set_rejected() {
        let iova = Arc::new(IovaMapper::new(MemoryRegion::new(0x1000_0000, 0x10_0000)));
        let regs = Arc::new(SimRegs::new());
        let cfg = QueueConfig::default().with_ring_size(16);
        let res: crate::Result<TxQueue<Vec<Vec<u8>>, SplitLenCodec>> =
            TxQueue::new(MAX_TX_QUEUES as u16, iova.clone(), regs, SplitLenCodec, cfg, None);
        assert!(matches!(res, Err(RingError::InvalidConfig(_))));
        assert_eq!(iova.live_mappings(), 0);
    }

    #[test]
    fn test_destroy_frees_ring() {
        let r = rig(QueueConfig::default().with_ring_size(16), None);
        let mut up = Upper::default();
        r.tx.enqueue(frames(&[64, 64]), Some(0), &r.acct, &mut up).unwrap();
        r.tx.destroy(&r.acct, &mut up);
        assert_eq!(up.done.len(), 1);
        assert_eq!(r.iova.live_mappings(), 0);
        assert_eq!(r.dev.regs().ring_size(), 0);
        assert_eq!(r.tx.queued(), 0);

        r.tx.destroy(&r.acct, &mut up);
        assert_eq!(up.done.len(), 1);
        let err = r.tx.enqueue_raw(frames(&[10]), 0, &r.acct).unwrap_err();
        assert_eq!(err.error, RingError::Shutdown);
    }

    #[test]
    fn test_shutdown_rejects_enqueue() {
        let r = rig(QueueConfig::default().with_ring_size(16), None);
        let mut up = Upper::default();
        r.tx.flush(&r.acct, &mut up);
        let err = r.tx.enqueue(frames(&[10]), None, &r.acct, &mut up).unwrap_err();
        assert_eq!(err.error, RingError::Shutdown);
        r.tx.destroy(&r.acct, &mut up);
        assert_eq!(r.tx.state(), QueueState::Destroyed);
    }
}
