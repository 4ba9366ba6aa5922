//! Rate limiting and flow table behaviour seen from the ports

use super::traffic::{arp_request, client, memory_ports, tcp_from, udp_from, SERVER};
use ratefwd::dataplane::{
    DataplaneClock, FlowKey, FlowTableRegistry, Forwarder, PortDispatchLoop, RateLimiter,
    TableFullPolicy, WorkerConfig, FLOW_TABLE_NAME,
};
use ratefwd::port::{MemoryPort, PortMap};
use ratefwd::protocol::ipv4::Ipv4Header;
use ratefwd::protocol::PacketView;
use ratefwd::telemetry::DataplaneMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Harness {
    rx: Arc<MemoryPort>,
    tx: Arc<MemoryPort>,
    registry: FlowTableRegistry,
    metrics: Arc<DataplaneMetrics>,
    worker: PortDispatchLoop,
    epoch: Instant,
}

impl Harness {
    fn new(capacity: usize, limiter: RateLimiter) -> Self {
        let (ports, list) = memory_ports(2);
        let registry = FlowTableRegistry::new();
        registry.create(FLOW_TABLE_NAME, capacity).unwrap();
        let metrics = Arc::new(DataplaneMetrics::new());
        let epoch = Instant::now();

        let worker = PortDispatchLoop::new(
            WorkerConfig {
                id: 0,
                rx_ports: vec![0],
                burst_size: 32,
                drain_interval: Duration::from_secs(3600),
                core: None,
            },
            list,
            Forwarder::new(Arc::new(PortMap::consecutive(2).unwrap())),
            limiter,
            &registry,
            metrics.clone(),
            DataplaneClock::starting_at(epoch),
        )
        .unwrap();

        Self {
            rx: ports[0].clone(),
            tx: ports[1].clone(),
            registry,
            metrics,
            worker,
            epoch,
        }
    }

    /// Poll once at `secs` on the dataplane clock and flush
    fn poll_at(&mut self, secs: u64) {
        self.worker
            .poll_once(self.epoch + Duration::from_millis(secs * 1000 + 1));
        self.worker.flush();
    }

    fn contains(&self, addr: std::net::Ipv4Addr) -> bool {
        self.registry
            .find_existing(FLOW_TABLE_NAME)
            .unwrap()
            .lock()
            .lookup(&FlowKey::from(addr))
            .is_some()
    }
}

#[test]
fn test_pps_limit_drops_from_threshold() {
    let mut h = Harness::new(64, RateLimiter::new(5, 0));
    for _ in 0..8 {
        h.rx.inject(udp_from(client(1)));
    }
    h.poll_at(0);

    // Counts 1..=4 pass; the drop fires once the count reaches 5
    assert_eq!(h.metrics.packets_forwarded.get(), 4);
    assert_eq!(h.metrics.packets_dropped.get(), 4);
    assert_eq!(h.tx.transmitted_count(), 4);

    // A later window starts over: the resetting packet is admitted uncounted
    h.rx.inject(udp_from(client(1)));
    h.poll_at(2);
    assert_eq!(h.metrics.packets_forwarded.get(), 5);

    let table = h.registry.find_existing(FLOW_TABLE_NAME).unwrap();
    let state = *table.lock().lookup(&FlowKey::from(client(1))).unwrap();
    assert_eq!(state.packets_this_window, 0);
    assert_eq!(state.bytes_this_window, 0);
    assert_eq!(state.window_start, 2);
}

#[test]
fn test_bps_limit_is_per_source() {
    let frame_len = udp_from(client(1)).len() as u64;
    // Third frame from a source reaches the byte budget
    let mut h = Harness::new(64, RateLimiter::new(0, frame_len * 3));

    for _ in 0..3 {
        h.rx.inject(udp_from(client(1)));
        h.rx.inject(udp_from(client(2)));
    }
    h.poll_at(0);

    assert_eq!(h.metrics.packets_forwarded.get(), 4);
    assert_eq!(h.metrics.packets_dropped.get(), 2);
}

#[test]
fn test_capacity_two_recycles_oldest_slot() {
    let mut h = Harness::new(2, RateLimiter::new(0, 0));
    for last in 1..=3 {
        h.rx.inject(udp_from(client(last)));
    }
    h.poll_at(0);

    assert!(!h.contains(client(1)));
    assert!(h.contains(client(2)));
    assert!(h.contains(client(3)));
    assert_eq!(h.metrics.flows_inserted.get(), 3);
    assert_eq!(h.metrics.flows_evicted.get(), 1);
    assert_eq!(h.metrics.flow_table_size.get(), 2);
    assert_eq!(h.metrics.packets_forwarded.get(), 3);

    // Source 1 comes back as a fresh flow and displaces slot 1 (source 2)
    h.rx.inject(udp_from(client(1)));
    h.poll_at(0);
    assert!(h.contains(client(1)));
    assert!(!h.contains(client(2)));
    assert!(h.contains(client(3)));
}

#[test]
fn test_zero_capacity_fail_open_and_closed() {
    let mut open = Harness::new(0, RateLimiter::new(1, 0));
    for _ in 0..3 {
        open.rx.inject(udp_from(client(1)));
    }
    open.poll_at(0);
    assert_eq!(open.metrics.packets_forwarded.get(), 3);
    assert_eq!(open.metrics.flows_uncached.get(), 3);
    assert_eq!(open.metrics.flow_table_size.get(), 0);

    let mut closed = Harness::new(
        0,
        RateLimiter::new(0, 0).with_table_full_policy(TableFullPolicy::FailClosed),
    );
    for _ in 0..3 {
        closed.rx.inject(udp_from(client(1)));
    }
    closed.poll_at(0);
    assert_eq!(closed.metrics.packets_forwarded.get(), 0);
    assert_eq!(closed.metrics.packets_dropped.get(), 3);
    assert_eq!(closed.tx.transmitted_count(), 0);
}

#[test]
fn test_unparseable_frames_released() {
    let mut h = Harness::new(8, RateLimiter::new(0, 0));
    h.rx.inject(arp_request());
    h.rx.inject(vec![0u8; 10]);
    h.rx.inject(tcp_from(client(4)));
    h.poll_at(0);

    assert_eq!(h.metrics.rx_packets.get(), 3);
    assert_eq!(h.metrics.packets_unparseable.get(), 2);
    assert_eq!(h.metrics.packets_forwarded.get(), 1);

    let sent = h.tx.take_transmitted();
    assert_eq!(sent.len(), 1);
    let view = PacketView::parse(&sent[0]).unwrap();
    assert_eq!(view.src_addr(), SERVER);
    assert_eq!(view.dst_addr(), client(4));
    assert_eq!(view.src_port(), Some(80));
    assert_eq!(view.dst_port(), Some(50000));

    let layout = view.layout();
    let ip = Ipv4Header::parse(&sent[0][layout.l3_offset..]).unwrap();
    assert!(ip.validate_checksum());
}
