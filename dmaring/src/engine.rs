//! Multi-queue engine.
//!
//! Owns every TX and RX queue of one device together with the state that
//! spans queues: per-class in-flight counts, the busy-queue set used to wait
//! for an idle device, and the control header cache.

use alloc::sync::Arc;
use alloc::vec::Vec;

use dma_pool::DmaMapper;
use spin::Mutex;

use crate::config::QueueConfig;
use crate::desc::{DescriptorCodec, SplitLenCodec};
use crate::error::{Result, RingError, TxEnqueueError};
use crate::poll::{self, PollOutcome};
use crate::regs::QueueRegs;
use crate::rx::RxQueue;
use crate::traits::{RxHandler, TxClass, TxFrames, TxHandler};
use crate::tx::TxQueue;
use crate::txwi::HeaderCache;

/// Maximum TX queues tracked by the busy set.
pub const MAX_TX_QUEUES: usize = 64;

const NUM_CLASSES: usize = TxClass::MAX as usize + 1;

// ═══════════════════════════════════════════════════════════════════════════
// CROSS-QUEUE ACCOUNTING
// ═══════════════════════════════════════════════════════════════════════════

struct AccountingInner {
    class_queued: [u32; NUM_CLASSES],
    /// Bit per TX queue with descriptors in flight.
    busy: u64,
}

/// Per-class in-flight counts and the device-wide "TX pending" condition.
pub struct TxAccounting {
    inner: Mutex<AccountingInner>,
}

impl TxAccounting {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AccountingInner {
                class_queued: [0; NUM_CLASSES],
                busy: 0,
            }),
        }
    }

    /// One more packet of `class` in flight.
    pub fn charge(&self, class: TxClass) {
        self.inner.lock().class_queued[class as usize] += 1;
    }

    /// One packet of `class` left the ring.
    pub fn release(&self, class: TxClass) {
        let mut inner = self.inner.lock();
        let slot = &mut inner.class_queued[class as usize];
        debug_assert!(*slot > 0, "class {} released more than charged", class);
        *slot = slot.saturating_sub(1);
    }

    /// Packets of `class` in flight.
    pub fn queued(&self, class: TxClass) -> u32 {
        self.inner.lock().class_queued[class as usize]
    }

    pub fn mark_busy(&self, qid: u16) {
        if (qid as usize) < MAX_TX_QUEUES {
            self.inner.lock().busy |= 1 << qid;
        }
    }

    pub fn mark_idle(&self, qid: u16) {
        if (qid as usize) < MAX_TX_QUEUES {
            self.inner.lock().busy &= !(1 << qid);
        }
    }

    pub fn is_busy(&self, qid: u16) -> bool {
        (qid as usize) < MAX_TX_QUEUES && self.inner.lock().busy & (1 << qid) != 0
    }

    /// Whether any TX queue still has descriptors in flight.
    pub fn any_pending(&self) -> bool {
        self.inner.lock().busy != 0
    }
}

impl Default for TxAccounting {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════

/// What a teardown released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// TX descriptors force-reclaimed.
    pub tx: usize,
    /// RX buffers released.
    pub rx: usize,
    /// Cached control headers freed.
    pub headers: usize,
}

/// All DMA queues of one device.
pub struct DmaEngine<P, C = SplitLenCodec> {
    mapper: Arc<dyn DmaMapper>,
    codec: C,
    headers: Option<Arc<HeaderCache>>,
    tx: Vec<TxQueue<P, C>>,
    rx: Vec<RxQueue<C>>,
    accounting: TxAccounting,
}

impl<P: TxFrames, C: DescriptorCodec + Clone> DmaEngine<P, C> {
    /// Create an engine with no queues.
    ///
    /// # Arguments
    /// - `header_size`: control header prepended to every packet sent with
    ///   [`tx_enqueue`](Self::tx_enqueue); 0 disables headers
    pub fn new(mapper: Arc<dyn DmaMapper>, codec: C, header_size: usize) -> Self {
        let headers = (header_size > 0).then(|| Arc::new(HeaderCache::new(Arc::clone(&mapper), header_size)));
        Self {
            mapper,
            codec,
            headers,
            tx: Vec::new(),
            rx: Vec::new(),
            accounting: TxAccounting::new(),
        }
    }

    /// Create a TX queue. Returns its id.
    pub fn add_tx_queue(&mut self, regs: Arc<dyn QueueRegs>, config: QueueConfig) -> Result<u16> {
        let qid = self.tx.len();
        if qid >= MAX_TX_QUEUES {
            return Err(RingError::InvalidConfig("too many TX queues"));
        }
        let q = TxQueue::new(
            qid as u16,
            Arc::clone(&self.mapper),
            regs,
            self.codec.clone(),
            config,
            self.headers.clone(),
        )?;
        self.tx.push(q);
        Ok(qid as u16)
    }

    /// Create an RX queue. Returns its id. Buffers are posted by
    /// [`init`](Self::init).
    pub fn add_rx_queue(&mut self, regs: Arc<dyn QueueRegs>, config: QueueConfig) -> Result<u16> {
        let qid = self.rx.len() as u16;
        let q = RxQueue::new(qid, Arc::clone(&self.mapper), regs, self.codec.clone(), config)?;
        self.rx.push(q);
        Ok(qid)
    }

    /// Fill every RX ring.
    pub fn init(&mut self) -> Result<()> {
        for q in &mut self.rx {
            let n = q.refill()?;
            log::info!("rx{}: armed with {} buffers", q.qid(), n);
        }
        Ok(())
    }

    pub fn tx_queue(&self, qid: u16) -> Option<&TxQueue<P, C>> {
        self.tx.get(qid as usize)
    }

    pub fn rx_queue(&self, qid: u16) -> Option<&RxQueue<C>> {
        self.rx.get(qid as usize)
    }

    pub fn rx_queue_mut(&mut self, qid: u16) -> Option<&mut RxQueue<C>> {
        self.rx.get_mut(qid as usize)
    }

    pub fn accounting(&self) -> &TxAccounting {
        &self.accounting
    }

    pub fn header_cache(&self) -> Option<&Arc<HeaderCache>> {
        self.headers.as_ref()
    }

    /// Queue a packet on TX queue `qid`. See [`TxQueue::enqueue`].
    pub fn tx_enqueue<H: TxHandler<P> + ?Sized>(
        &self,
        qid: u16,
        packet: P,
        class: Option<TxClass>,
        handler: &mut H,
    ) -> core::result::Result<u16, TxEnqueueError<P>> {
        match self.tx.get(qid as usize) {
            Some(q) => q.enqueue(packet, class, &self.accounting, handler),
            None => Err(TxEnqueueError::new(RingError::UnknownQueue(qid), packet)),
        }
    }

    /// Queue a raw frame on TX queue `qid`. See [`TxQueue::enqueue_raw`].
    pub fn tx_enqueue_raw(
        &self,
        qid: u16,
        packet: P,
        info: u32,
    ) -> core::result::Result<u16, TxEnqueueError<P>> {
        match self.tx.get(qid as usize) {
            Some(q) => q.enqueue_raw(packet, info, &self.accounting),
            None => Err(TxEnqueueError::new(RingError::UnknownQueue(qid), packet)),
        }
    }

    /// Poll RX queue `qid` with `budget`.
    pub fn poll_rx<H: RxHandler + ?Sized>(&mut self, qid: u16, budget: usize, handler: &mut H) -> Result<PollOutcome> {
        let q = self.rx.get_mut(qid as usize).ok_or(RingError::UnknownQueue(qid))?;
        Ok(poll::poll_rx(q, budget, handler))
    }

    /// Reclaim completed descriptors on every TX queue.
    pub fn poll_tx<H: TxHandler<P> + ?Sized>(&self, handler: &mut H) -> usize {
        self.tx
            .iter()
            .map(|q| q.reclaim(false, &self.accounting, handler))
            .sum()
    }

    /// Whether any TX queue still has descriptors in flight.
    pub fn tx_pending(&self) -> bool {
        self.accounting.any_pending()
    }

    /// Packets of `class` in flight across all TX queues.
    pub fn class_queued(&self, class: TxClass) -> u32 {
        self.accounting.queued(class)
    }

    /// Reset RX queue `qid`. See [`RxQueue::reset`].
    pub fn rx_reset(&mut self, qid: u16) -> Result<usize> {
        self.rx
            .get_mut(qid as usize)
            .ok_or(RingError::UnknownQueue(qid))?
            .reset()
    }

    /// Tear everything down: force-flush every queue and free the header
    /// cache. Completion callbacks fire with [`TxStatus::Aborted`] for
    /// packets the device never finished.
    ///
    /// [`TxStatus::Aborted`]: crate::traits::TxStatus::Aborted
    pub fn cleanup<H: TxHandler<P> + ?Sized>(&mut self, handler: &mut H) -> CleanupReport {
        let mut report = CleanupReport::default();
        for q in &self.tx {
            report.tx += q.flush(&self.accounting, handler);
            q.destroy(&self.accounting, handler);
        }
        for q in &mut self.rx {
            report.rx += q.flush();
            q.destroy();
        }
        if let Some(cache) = &self.headers {
            report.headers = cache.drain();
        }
        log::info!(
            "dma: cleanup released {} tx descriptors, {} rx buffers, {} headers",
            report.tx,
            report.rx,
            report.headers
        );
        report
    }
}
