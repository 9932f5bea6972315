//! End-to-end scenarios against the simulated device.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use dma_pool::{DmaMapper, IovaMapper, MemoryRegion};

use crate::sim::{SimDevice, SimRegs};
use crate::{
    DmaEngine, QueueConfig, RingError, RxHandler, RxPacket, SplitLenCodec, TxHandler, TxStatus,
};

type Packet = Vec<Vec<u8>>;

#[derive(Default)]
struct Upper {
    completed: Vec<TxStatus>,
    received: Vec<Vec<u8>>,
    infos: Vec<u32>,
    stops: usize,
    wakes: usize,
}

impl TxHandler<Packet> for Upper {
    fn packet_done(&mut self, _qid: u16, _packet: Packet, status: TxStatus) {
        self.completed.push(status);
    }

    fn stop_queue(&mut self, _qid: u16) {
        self.stops += 1;
    }

    fn wake_queue(&mut self, _qid: u16) {
        self.wakes += 1;
    }
}

impl RxHandler for Upper {
    fn deliver(&mut self, _qid: u16, packet: RxPacket) {
        self.infos.push(packet.info());
        self.received.push(packet.to_vec());
    }
}

struct Device {
    iova: Arc<IovaMapper>,
    engine: DmaEngine<Packet>,
    tx_dev: SimDevice,
    rx_dev: SimDevice,
}

fn device(tx_cfg: QueueConfig, rx_cfg: QueueConfig) -> Device {
    let iova = Arc::new(IovaMapper::new(MemoryRegion::new(0x1000_0000, 0x200_0000)));
    let mapper: Arc<dyn DmaMapper> = iova.clone();
    let tx_regs = Arc::new(SimRegs::new());
    let rx_regs = Arc::new(SimRegs::new());

    let mut engine = DmaEngine::new(mapper, SplitLenCodec, 0);
    assert_eq!(engine.add_tx_queue(tx_regs.clone(), tx_cfg).unwrap(), 0);
    assert_eq!(engine.add_rx_queue(rx_regs.clone(), rx_cfg).unwrap(), 0);
    engine.init().unwrap();

    Device {
        tx_dev: SimDevice::new(iova.clone(), tx_regs),
        rx_dev: SimDevice::new(iova.clone(), rx_regs),
        iova,
        engine,
    }
}

fn single(len: usize) -> Packet {
    vec![vec![0x5A; len]]
}

#[test]
fn single_segment_packet_round_trip() {
    let cfg = QueueConfig::default();
    let d = device(cfg, cfg);
    let mut up = Upper::default();
    let before = d.iova.live_mappings();

    d.engine.tx_enqueue(0, single(1500), Some(0), &mut up).unwrap();
    let tx = d.engine.tx_queue(0).unwrap();
    assert_eq!(tx.queued(), 1);
    assert_eq!(tx.stats().descriptors, 1);
    assert_eq!(d.iova.live_mappings(), before + 1);
    assert!(d.engine.tx_pending());
    assert_eq!(d.engine.class_queued(0), 1);

    assert_eq!(d.tx_dev.complete_all(), 1);
    assert_eq!(d.engine.poll_tx(&mut up), 1);
    assert_eq!(up.completed, vec![TxStatus::Ok]);
    assert_eq!(d.iova.live_mappings(), before);
    assert!(!d.engine.tx_pending());
    assert_eq!(d.engine.class_queued(0), 0);

    // nothing left to reclaim, no second completion
    assert_eq!(d.engine.poll_tx(&mut up), 0);
    assert_eq!(up.completed.len(), 1);
}

#[test]
fn multi_descriptor_packet_reassembled() {
    let cfg = QueueConfig::default();
    let mut d = device(cfg, cfg);
    let mut up = Upper::default();
    assert_eq!(d.engine.rx_queue(0).unwrap().queued(), 255);

    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    assert!(d.rx_dev.receive_frame(&payload[..1400], false));
    assert!(d.rx_dev.receive_frame(&payload[1400..2800], false));
    assert!(d.rx_dev.receive_frame(&payload[2800..], true));

    let out = d.engine.poll_rx(0, 10, &mut up).unwrap();
    assert_eq!(out.processed, 1);
    assert!(out.complete);
    assert_eq!(up.received.len(), 1);
    assert_eq!(up.received[0].len(), 3000);
    assert_eq!(up.received[0], payload);
    assert_eq!(up.infos, vec![0]);

    let rx = d.engine.rx_queue(0).unwrap();
    assert_eq!(rx.queued(), 255);
    assert_eq!(rx.stats().fragments, 2);
}

#[test]
fn headroom_is_excluded_from_packet_length() {
    let tx_cfg = QueueConfig::default().with_ring_size(16);
    let rx_cfg = QueueConfig::default().with_ring_size(16).with_buf_offset(128);
    let mut d = device(tx_cfg, rx_cfg);
    let mut up = Upper::default();

    d.rx_dev.receive_packet(&[7u8; 4000], 1900);
    d.engine.poll_rx(0, 10, &mut up).unwrap();
    assert_eq!(up.received.len(), 1);
    assert_eq!(up.received[0], vec![7u8; 4000]);
}

#[test]
fn queue_full_is_atomic() {
    let tx_cfg = QueueConfig::default().with_ring_size(16);
    let d = device(tx_cfg, QueueConfig::default().with_ring_size(16));
    let mut up = Upper::default();

    for _ in 0..13 {
        d.engine.tx_enqueue(0, single(64), Some(1), &mut up).unwrap();
    }
    let tx = d.engine.tx_queue(0).unwrap();
    let (head, tail, queued) = tx.indices();
    assert_eq!(queued, 13);
    let mapped = d.iova.live_mappings();

    let five = vec![vec![1u8; 100]; 5];
    let err = d.engine.tx_enqueue(0, five, Some(1), &mut up).unwrap_err();
    assert_eq!(err.error, RingError::QueueFull { needed: 3, free: 2 });
    assert!(err.error.is_ring_full());
    assert_eq!(err.packet.len(), 5);

    assert_eq!(tx.indices(), (head, tail, queued));
    assert_eq!(d.iova.live_mappings(), mapped);
    assert_eq!(d.engine.class_queued(1), 13);
    assert_eq!(tx.stats().queue_full, 1);
}

#[test]
fn forced_flush_releases_everything() {
    let tx_cfg = QueueConfig::default().with_ring_size(32);
    let rx_cfg = QueueConfig::default().with_ring_size(6);
    let mut d = device(tx_cfg, rx_cfg);
    let mut up = Upper::default();

    for _ in 0..10 {
        d.engine.tx_enqueue(0, single(256), Some(0), &mut up).unwrap();
    }
    assert_eq!(d.engine.rx_queue(0).unwrap().queued(), 5);
    // two rings, ten TX segments, five RX buffers
    assert_eq!(d.iova.live_mappings(), 2 + 10 + 5);

    let report = d.engine.cleanup(&mut up);
    assert_eq!((report.tx, report.rx), (10, 5));
    assert_eq!(up.completed, vec![TxStatus::Aborted; 10]);
    assert_eq!(d.engine.tx_queue(0).unwrap().queued(), 0);
    assert_eq!(d.engine.rx_queue(0).unwrap().queued(), 0);
    // rings are gone too
    assert_eq!(d.iova.live_mappings(), 0);
    assert!(!d.engine.tx_pending());
    assert_eq!(d.engine.class_queued(0), 0);

    let again = d.engine.cleanup(&mut up);
    assert_eq!((again.tx, again.rx), (0, 0));
    assert_eq!(up.completed.len(), 10);

    let err = d.engine.tx_enqueue(0, single(64), None, &mut up).unwrap_err();
    assert_eq!(err.error, RingError::Shutdown);
}

#[test]
fn backpressure_round_trip() {
    let tx_cfg = QueueConfig::default().with_ring_size(32);
    let d = device(tx_cfg, QueueConfig::default().with_ring_size(16));
    let mut up = Upper::default();

    for _ in 0..23 {
        d.engine.tx_enqueue(0, single(64), Some(2), &mut up).unwrap();
    }
    assert_eq!(up.stops, 0);
    d.engine.tx_enqueue(0, single(64), Some(2), &mut up).unwrap();
    assert_eq!(up.stops, 1);
    assert!(d.engine.tx_queue(0).unwrap().is_stopped());

    // still above the threshold, no second stop
    d.engine.tx_enqueue(0, single(64), Some(2), &mut up).unwrap();
    assert_eq!(up.stops, 1);

    d.tx_dev.complete_tx(1);
    d.engine.poll_tx(&mut up);
    assert_eq!(up.wakes, 0);

    d.tx_dev.complete_tx(1);
    d.engine.poll_tx(&mut up);
    assert_eq!(up.wakes, 1);
    assert!(!d.engine.tx_queue(0).unwrap().is_stopped());

    d.tx_dev.complete_all();
    d.engine.poll_tx(&mut up);
    assert_eq!(up.wakes, 1);
    assert_eq!(up.completed.len(), 25);
}

#[test]
fn corrupt_length_mid_sequence_drops_packet() {
    let cfg = QueueConfig::default().with_ring_size(16);
    let mut d = device(cfg, cfg);
    let mut up = Upper::default();
    let mapped = d.iova.live_mappings();

    assert!(d.rx_dev.receive_frame(&[1u8; 1400], false));
    assert!(d.rx_dev.receive_len(5000, false));
    assert!(d.rx_dev.receive_frame(&[3u8; 200], true));
    assert!(d.rx_dev.receive_frame(&[4u8; 100], true));

    d.engine.poll_rx(0, 10, &mut up).unwrap();
    assert_eq!(up.received, vec![vec![4u8; 100]]);

    let rx = d.engine.rx_queue(0).unwrap();
    assert_eq!(rx.stats().corrupt, 1);
    assert_eq!(rx.stats().dropped, 1);
    assert!(!rx.has_partial());
    assert_eq!(rx.queued(), 15);
    assert_eq!(rx.pool().outstanding(), 15);
    assert_eq!(d.iova.live_mappings(), mapped);
}

#[test]
fn rx_reset_recovers_stalled_ring() {
    let cfg = QueueConfig::default().with_ring_size(8);
    let mut d = device(QueueConfig::default().with_ring_size(16), cfg);
    let mut up = Upper::default();

    d.rx_dev.receive_frame(&[9u8; 500], false);
    d.engine.poll_rx(0, 10, &mut up).unwrap();
    assert!(d.engine.rx_queue(0).unwrap().has_partial());

    assert_eq!(d.engine.rx_reset(0).unwrap(), 7);
    let rx = d.engine.rx_queue(0).unwrap();
    assert!(!rx.has_partial());
    assert_eq!(rx.queued(), 7);

    d.rx_dev.receive_frame(&[5u8; 60], true);
    d.engine.poll_rx(0, 10, &mut up).unwrap();
    assert_eq!(up.received, vec![vec![5u8; 60]]);
}

#[test]
fn unknown_queue_ids() {
    let cfg = QueueConfig::default().with_ring_size(16);
    let mut d = device(cfg, cfg);
    let mut up = Upper::default();
    let err = d.engine.tx_enqueue(3, single(10), None, &mut up).unwrap_err();
    assert_eq!(err.error, RingError::UnknownQueue(3));
    assert_eq!(d.engine.poll_rx(2, 10, &mut up), Err(RingError::UnknownQueue(2)));
}

#[test]
fn raw_frames_bypass_class_accounting() {
    let cfg = QueueConfig::default().with_ring_size(16);
    let d = device(cfg, cfg);
    let mut up = Upper::default();

    d.engine.tx_enqueue_raw(0, single(80), 0xF00D).unwrap();
    assert_eq!(d.engine.class_queued(0), 0);
    assert!(d.engine.tx_pending());

    d.tx_dev.complete_all();
    assert_eq!(d.engine.poll_tx(&mut up), 1);
    assert_eq!(up.completed, vec![TxStatus::Ok]);
    assert!(!d.engine.tx_pending());
}
