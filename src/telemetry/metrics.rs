//! Dataplane counters.
//!
//! Counters are plain relaxed atomics. Workers add to them on the fast path
//! and the stats reporter reads them; readers may see values a burst behind,
//! never torn ones.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Point-in-time gauge.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Verdict totals, the pair the stats reporter prints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub forwarded: u64,
    pub dropped: u64,
}

/// Process-wide metrics shared by every worker.
#[derive(Debug, Default)]
pub struct DataplaneMetrics {
    // Verdicts
    /// Packets admitted by the rate limiter and handed to an output batch.
    pub packets_forwarded: Counter,
    /// Packets rejected by the rate limiter.
    pub packets_dropped: Counter,
    /// Frames that were not IPv4 and were released unprocessed.
    pub packets_unparseable: Counter,

    // Port I/O
    pub rx_packets: Counter,
    pub rx_bytes: Counter,
    pub rx_errors: Counter,
    pub tx_packets: Counter,
    /// Frames released because the output port did not accept them.
    pub tx_errors: Counter,

    // Flow table
    pub flows_inserted: Counter,
    /// Flows recycled to make room for a new source.
    pub flows_evicted: Counter,
    /// Packets admitted without state because no flow slot was available.
    pub flows_uncached: Counter,
    pub flow_table_size: Gauge,
}

impl DataplaneMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Totals {
        Totals {
            forwarded: self.packets_forwarded.get(),
            dropped: self.packets_dropped.get(),
        }
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        vec![
            ("packets_forwarded".into(), self.packets_forwarded.get()),
            ("packets_dropped".into(), self.packets_dropped.get()),
            ("packets_unparseable".into(), self.packets_unparseable.get()),
            ("rx_packets".into(), self.rx_packets.get()),
            ("rx_bytes".into(), self.rx_bytes.get()),
            ("rx_errors".into(), self.rx_errors.get()),
            ("tx_packets".into(), self.tx_packets.get()),
            ("tx_errors".into(), self.tx_errors.get()),
            ("flows_inserted".into(), self.flows_inserted.get()),
            ("flows_evicted".into(), self.flows_evicted.get()),
            ("flows_uncached".into(), self.flows_uncached.get()),
            ("flow_table_size".into(), self.flow_table_size.get()),
        ]
    }
}
