//! Per-port transmit staging
//!
//! Frames accumulate until the batch is full or the worker's drain timer
//! fires. A flush makes one transmit attempt; whatever the port does not
//! take is released and reported as failed.

use crate::port::{PacketBuf, Port, PortId};
use std::sync::Arc;

/// Result of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub sent: usize,
    pub failed: usize,
}

impl FlushOutcome {
    fn merge(&mut self, other: FlushOutcome) {
        self.sent += other.sent;
        self.failed += other.failed;
    }
}

pub struct OutputBatch {
    port_id: PortId,
    port: Arc<dyn Port>,
    packets: Vec<PacketBuf>,
    capacity: usize,
}

impl OutputBatch {
    pub fn new(port_id: PortId, port: Arc<dyn Port>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            port_id,
            port,
            packets: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, flushing if that fills the batch.
    pub fn push(&mut self, frame: PacketBuf) -> FlushOutcome {
        self.packets.push(frame);
        if self.packets.len() >= self.capacity {
            self.flush()
        } else {
            FlushOutcome::default()
        }
    }

    /// Hand everything to the port. Unsent frames are dropped.
    pub fn flush(&mut self) -> FlushOutcome {
        if self.packets.is_empty() {
            return FlushOutcome::default();
        }

        let queued = self.packets.len();
        let sent = match self.port.tx_burst(&mut self.packets) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(port = self.port.name(), error = %e, "tx burst failed");
                queued - self.packets.len()
            }
        };

        let failed = self.packets.len();
        if failed > 0 {
            tracing::trace!(port = self.port.name(), failed, "released unsent frames");
            self.packets.clear();
        }

        FlushOutcome { sent, failed }
    }

    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// The batches one worker transmits through, keyed by port
#[derive(Default)]
pub struct BatchSet {
    batches: Vec<OutputBatch>,
}

impl BatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch for `port_id` unless one exists already
    pub fn ensure(&mut self, port_id: PortId, port: Arc<dyn Port>, capacity: usize) {
        if self.get_mut(port_id).is_none() {
            self.batches.push(OutputBatch::new(port_id, port, capacity));
        }
    }

    pub fn get_mut(&mut self, port_id: PortId) -> Option<&mut OutputBatch> {
        self.batches.iter_mut().find(|b| b.port_id == port_id)
    }

    pub fn flush_all(&mut self) -> FlushOutcome {
        let mut total = FlushOutcome::default();
        for batch in &mut self.batches {
            total.merge(batch.flush());
        }
        total
    }

    /// Frames staged across all batches
    pub fn pending(&self) -> usize {
        self.batches.iter().map(OutputBatch::len).sum()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
