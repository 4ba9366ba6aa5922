//! Frame and port fixtures

use ratefwd::config::Config;
use ratefwd::port::{MemoryPort, Port, PortList};
use ratefwd::protocol::ethernet::FrameBuilder;
use ratefwd::protocol::ipv4::{Ipv4Builder, Protocol};
use ratefwd::protocol::tcp::TcpBuilder;
use ratefwd::protocol::udp::UdpBuilder;
use ratefwd::protocol::{EtherType, MacAddr};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SERVER: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);
pub const SERVER_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
pub const CLIENT_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x02]);

fn ethernet(ip: &[u8]) -> Vec<u8> {
    FrameBuilder::new()
        .dst_mac(SERVER_MAC)
        .src_mac(CLIENT_MAC)
        .ethertype(EtherType::Ipv4 as u16)
        .payload(ip)
        .build()
}

pub fn udp_from(src: Ipv4Addr) -> Vec<u8> {
    let udp = UdpBuilder::new()
        .src_port(33000)
        .dst_port(9)
        .payload(&[0xab; 32])
        .build(src, SERVER);
    let ip = Ipv4Builder::new()
        .src_addr(src)
        .dst_addr(SERVER)
        .protocol(Protocol::Udp as u8)
        .payload(&udp)
        .build();
    ethernet(&ip)
}

pub fn tcp_from(src: Ipv4Addr) -> Vec<u8> {
    let tcp = TcpBuilder::new()
        .src_port(50000)
        .dst_port(80)
        .payload(b"GET / HTTP/1.0\r\n\r\n")
        .build(src, SERVER);
    let ip = Ipv4Builder::new()
        .src_addr(src)
        .dst_addr(SERVER)
        .protocol(Protocol::Tcp as u8)
        .payload(&tcp)
        .build();
    ethernet(&ip)
}

pub fn arp_request() -> Vec<u8> {
    FrameBuilder::new()
        .dst_mac(MacAddr::BROADCAST)
        .src_mac(CLIENT_MAC)
        .ethertype(EtherType::Arp as u16)
        .payload(&[0u8; 28])
        .build()
}

pub fn client(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(198, 51, 100, last)
}

/// Memory ports named mem0..memN, plus the same list as trait objects
pub fn memory_ports(n: usize) -> (Vec<Arc<MemoryPort>>, PortList) {
    let ports: Vec<Arc<MemoryPort>> = (0..n)
        .map(|i| Arc::new(MemoryPort::new(format!("mem{}", i))))
        .collect();
    let list: Vec<Arc<dyn Port>> = ports
        .iter()
        .map(|p| p.clone() as Arc<dyn Port>)
        .collect();
    (ports, list.into())
}

pub fn config_for(n: usize) -> Config {
    let mut config = Config::default();
    config.ports.interfaces = (0..n).map(|i| format!("mem{}", i)).collect();
    config
}

/// Spin until `cond` holds, failing the test after a few seconds
pub fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(1));
    }
}
