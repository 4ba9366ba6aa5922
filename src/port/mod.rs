//! Port I/O backends
//!
//! A port is polled for bursts of received frames and accepts bursts for
//! transmission. Neither call blocks: an empty receive and a partial
//! transmit are normal outcomes.
//!
//! - AF_PACKET: raw socket bound to a Linux interface. Reads whole frames
//!   up to [`MAX_FRAME_SIZE`]; longer ones fail the burst with
//!   `FrameTooLarge`. Tags removed by rx VLAN offload are restored.
//! - Memory: in-process queues, used by tests and dry runs

mod af_packet;
mod memory;

pub use af_packet::{AfPacketPort, MAX_FRAME_SIZE};
pub use memory::MemoryPort;

use crate::{Error, Result};
use std::sync::Arc;

/// An owned frame buffer. Dropping it releases it.
pub type PacketBuf = Vec<u8>;

/// Index of a port in the port list
pub type PortId = usize;

/// Port backend trait
///
/// Ports are shared: one worker receives on a port while the worker that
/// polls its peer transmits on it.
pub trait Port: Send + Sync {
    fn name(&self) -> &str;

    /// Append up to `max` received frames to `out`. Returns how many were added.
    fn rx_burst(&self, out: &mut Vec<PacketBuf>, max: usize) -> Result<usize>;

    /// Transmit frames from the front of `pkts`, removing the ones sent.
    /// Returns the number sent; unsent frames stay in `pkts`.
    fn tx_burst(&self, pkts: &mut Vec<PacketBuf>) -> Result<usize>;
}

/// Fixed bidirectional pairing of ports: traffic received on a port leaves
/// through its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMap {
    peer: Vec<PortId>,
}

impl PortMap {
    /// Pair 0<->1, 2<->3, ... Needs an even number of ports.
    pub fn consecutive(num_ports: usize) -> Result<Self> {
        if num_ports == 0 || num_ports % 2 != 0 {
            return Err(Error::Config(format!(
                "consecutive pairing needs an even, non-zero port count (got {})",
                num_ports
            )));
        }

        Ok(Self {
            peer: (0..num_ports).map(|p| p ^ 1).collect(),
        })
    }

    /// Build from explicit pairs. Every port must appear in exactly one pair.
    pub fn from_pairs(num_ports: usize, pairs: &[(PortId, PortId)]) -> Result<Self> {
        let mut peer = vec![None; num_ports];

        for &(a, b) in pairs {
            if a == b {
                return Err(Error::Config(format!("port {} paired with itself", a)));
            }
            for port in [a, b] {
                match peer.get(port) {
                    None => return Err(Error::PortNotFound(port)),
                    Some(Some(_)) => {
                        return Err(Error::Config(format!("port {} paired twice", port)))
                    }
                    Some(None) => {}
                }
            }
            peer[a] = Some(b);
            peer[b] = Some(a);
        }

        let peer = peer
            .into_iter()
            .enumerate()
            .map(|(port, p)| p.ok_or_else(|| Error::Config(format!("port {} has no pair", port))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { peer })
    }

    pub fn peer(&self, port: PortId) -> Option<PortId> {
        self.peer.get(port).copied()
    }

    pub fn len(&self) -> usize {
        self.peer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peer.is_empty()
    }
}

/// Split ports across workers, filling each worker with up to
/// `ports_per_worker` input ports before moving to the next.
pub fn assign_ports(
    num_ports: usize,
    num_workers: usize,
    ports_per_worker: usize,
) -> Result<Vec<Vec<PortId>>> {
    if ports_per_worker == 0 {
        return Err(Error::Config("ports_per_worker must be at least 1".into()));
    }

    let needed = num_ports.div_ceil(ports_per_worker);
    if needed > num_workers {
        return Err(Error::Config(format!(
            "{} ports at {} per worker need {} workers, only {} available",
            num_ports, ports_per_worker, needed, num_workers
        )));
    }

    let mut workers = vec![Vec::new(); num_workers];
    for port in 0..num_ports {
        workers[port / ports_per_worker].push(port);
    }
    Ok(workers)
}

/// Shared handle list indexed by `PortId`
pub type PortList = Arc<[Arc<dyn Port>]>;
