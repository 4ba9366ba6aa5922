//! In-memory port

use super::{PacketBuf, Port};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Port backed by in-process queues
///
/// Frames injected with [`MemoryPort::inject`] are returned by `rx_burst`;
/// transmitted frames are collected until taken. A transmit limit can be set
/// to model a full descriptor ring, and a receive size limit to model frames
/// that overrun the receive buffer.
#[derive(Debug, Default)]
pub struct MemoryPort {
    name: String,
    rx: Mutex<VecDeque<PacketBuf>>,
    tx: Mutex<Vec<PacketBuf>>,
    /// Max frames accepted per `tx_burst` call
    tx_limit: Option<usize>,
    /// Longest frame `rx_burst` hands out
    max_frame: Option<usize>,
}

impl MemoryPort {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_tx_limit(mut self, limit: usize) -> Self {
        self.tx_limit = Some(limit);
        self
    }

    pub fn with_max_frame(mut self, len: usize) -> Self {
        self.max_frame = Some(len);
        self
    }

    /// Queue a frame for reception
    pub fn inject(&self, frame: PacketBuf) {
        self.rx.lock().push_back(frame);
    }

    pub fn pending_rx(&self) -> usize {
        self.rx.lock().len()
    }

    /// Take every frame transmitted so far
    pub fn take_transmitted(&self) -> Vec<PacketBuf> {
        std::mem::take(&mut *self.tx.lock())
    }

    pub fn transmitted_count(&self) -> usize {
        self.tx.lock().len()
    }
}

impl Port for MemoryPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn rx_burst(&self, out: &mut Vec<PacketBuf>, max: usize) -> Result<usize> {
        let mut rx = self.rx.lock();
        let mut received = 0;
        while received < max {
            let frame = match rx.pop_front() {
                Some(frame) => frame,
                None => break,
            };
            if let Some(limit) = self.max_frame.filter(|&limit| frame.len() > limit) {
                // Released; frames already in `out` stay there
                return Err(Error::FrameTooLarge {
                    len: frame.len(),
                    max: limit,
                });
            }
            out.push(frame);
            received += 1;
        }
        Ok(received)
    }

    fn tx_burst(&self, pkts: &mut Vec<PacketBuf>) -> Result<usize> {
        let n = self.tx_limit.map_or(pkts.len(), |limit| limit.min(pkts.len()));
        self.tx.lock().extend(pkts.drain(..n));
        Ok(n)
    }
}
