//! Multi-worker runs through the runtime

use super::traffic::{client, config_for, memory_ports, udp_from, wait_for};
use ratefwd::dataplane::{FlowKey, FLOW_TABLE_NAME};
use ratefwd::protocol::PacketView;
use ratefwd::runtime::Dataplane;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[test]
fn test_shared_flow_counted_exactly_across_workers() {
    const PER_PORT: usize = 500;
    const PPS: u64 = 1200;

    let (ports, list) = memory_ports(4);
    let mut config = config_for(4);
    config.limits.pps = PPS;
    config.dataplane.ports_per_worker = 1;

    let dataplane = Dataplane::build(&config, list).unwrap();
    assert_eq!(dataplane.workers().len(), 4);
    let metrics = dataplane.metrics();
    let registry = dataplane.registry();

    // One source hitting every port, so all four workers contend on one flow
    for port in &ports {
        for _ in 0..PER_PORT {
            port.inject(udp_from(client(7)));
        }
    }

    let shutdown = CancellationToken::new();
    let workers = dataplane.spawn_workers(&shutdown).unwrap();
    let total = (PER_PORT * ports.len()) as u64;
    wait_for("all frames processed", || metrics.rx_packets.get() == total);
    shutdown.cancel();
    workers.join().unwrap();

    let table = registry.find_existing(FLOW_TABLE_NAME).unwrap();
    let state = *table.lock().lookup(&FlowKey::from(client(7))).unwrap();
    assert_eq!(state.packets_this_window, total);

    assert_eq!(metrics.packets_forwarded.get(), PPS - 1);
    assert_eq!(metrics.packets_dropped.get(), total - (PPS - 1));

    // Shutdown flushed every batch
    let transmitted: usize = ports.iter().map(|p| p.transmitted_count()).sum();
    assert_eq!(transmitted as u64, PPS - 1);
    assert_eq!(metrics.tx_packets.get(), PPS - 1);
}

#[test]
fn test_idle_workers_exit_and_busy_ones_keep_running() {
    let (ports, list) = memory_ports(2);
    let mut config = config_for(2);
    config.dataplane.ports_per_worker = 2;
    // Two extra workers get no ports
    config.dataplane.cores = vec![0, 0, 0];

    let dataplane = Dataplane::build(&config, list).unwrap();
    assert_eq!(dataplane.workers().len(), 3);
    let metrics = dataplane.metrics();

    let shutdown = CancellationToken::new();
    let workers = dataplane.spawn_workers(&shutdown).unwrap();

    ports[1].inject(udp_from(client(9)));
    wait_for("reflection on mem0", || ports[0].transmitted_count() == 1);
    assert_eq!(metrics.packets_forwarded.get(), 1);

    shutdown.cancel();
    workers.join().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_serve_until_cancelled() {
    let (ports, list) = memory_ports(2);
    let mut config = config_for(2);
    config.stats.enabled = true;

    let dataplane = Dataplane::build(&config, list)
        .unwrap()
        .with_stats_interval(Duration::from_millis(10));
    let metrics = dataplane.metrics();

    let shutdown = CancellationToken::new();
    let serving = tokio::spawn(dataplane.serve(shutdown.clone()));

    ports[0].inject(udp_from(client(1)));
    ports[0].inject(udp_from(client(2)));

    // The drain interval pushes out a partly filled batch while running
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while ports[1].transmitted_count() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "batch never drained");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    shutdown.cancel();
    serving.await.unwrap().unwrap();

    let sent = ports[1].take_transmitted();
    let dst: Vec<_> = sent
        .iter()
        .map(|f| PacketView::parse(f).unwrap().dst_addr())
        .collect();
    assert_eq!(dst, vec![client(1), client(2)]);
    assert_eq!(metrics.snapshot().forwarded, 2);
    assert_eq!(metrics.snapshot().dropped, 0);
}
