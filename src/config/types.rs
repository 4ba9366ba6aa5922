//! Configuration types

use crate::dataplane::{TableFullPolicy, DEFAULT_CAPACITY};
use crate::port::{PortId, PortMap};
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub dataplane: DataplaneConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

/// Per-source limits. 0 means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub pps: u64,
    pub bps: u64,
    pub on_table_full: TableFullPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DataplaneConfig {
    /// Max frames per rx poll, also the output batch size
    pub burst_size: usize,
    pub drain_interval_us: u64,
    pub flow_table_capacity: usize,
    pub ports_per_worker: usize,
    /// CPU for each worker, by worker index
    pub cores: Vec<usize>,
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        Self {
            burst_size: 32,
            drain_interval_us: 100,
            flow_table_capacity: DEFAULT_CAPACITY,
            ports_per_worker: 1,
            cores: Vec::new(),
        }
    }
}

impl DataplaneConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_micros(self.drain_interval_us)
    }

    /// Workers needed to cover `num_ports` input ports
    pub fn worker_count(&self, num_ports: usize) -> usize {
        num_ports.div_ceil(self.ports_per_worker.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub interfaces: Vec<String>,
    /// Explicit pairing by interface name; consecutive pairing when empty
    pub pairs: Vec<(String, String)>,
    pub promiscuous: bool,
}

impl PortsConfig {
    pub fn index_of(&self, name: &str) -> Option<PortId> {
        self.interfaces.iter().position(|i| i == name)
    }

    /// Resolve the configured pairing to port indices
    pub fn port_map(&self) -> Result<PortMap> {
        if self.pairs.is_empty() {
            return PortMap::consecutive(self.interfaces.len());
        }

        let pairs = self
            .pairs
            .iter()
            .map(|(a, b)| Ok((self.resolve(a)?, self.resolve(b)?)))
            .collect::<Result<Vec<_>>>()?;
        PortMap::from_pairs(self.interfaces.len(), &pairs)
    }

    fn resolve(&self, name: &str) -> Result<PortId> {
        self.index_of(name).ok_or_else(|| Error::InterfaceNotFound {
            name: name.to_string(),
        })
    }
}
