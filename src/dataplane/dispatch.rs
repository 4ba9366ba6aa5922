//! Per-core dispatch loop
//!
//! Each worker owns a disjoint set of input ports and the output batches of
//! their peers. An iteration flushes stale batches, then polls every input
//! port once and runs the burst through classification, the rate limiter
//! and the reflector.

use super::flow_table::{FlowKey, FlowTableRegistry, SharedFlowTable};
use super::forwarder::Forwarder;
use super::output_batch::{BatchSet, FlushOutcome};
use super::rate_limiter::{Admission, RateLimiter, Verdict};
use crate::port::{PacketBuf, PortId, PortList};
use crate::protocol::PacketView;
use crate::telemetry::DataplaneMetrics;
use crate::{Error, Result};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Registry name of the shared rate-limit table
pub const FLOW_TABLE_NAME: &str = "rate_limits";

/// Whole seconds since a shared epoch
///
/// All workers use the same epoch so flow windows line up across cores.
#[derive(Debug, Clone, Copy)]
pub struct DataplaneClock {
    epoch: Instant,
}

impl DataplaneClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(epoch: Instant) -> Self {
        Self { epoch }
    }

    pub fn secs(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_secs()
    }
}

impl Default for DataplaneClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: usize,
    pub rx_ports: Vec<PortId>,
    pub burst_size: usize,
    pub drain_interval: Duration,
    /// CPU to pin the worker thread to
    pub core: Option<usize>,
}

pub struct PortDispatchLoop {
    id: usize,
    rx_ports: Vec<PortId>,
    ports: PortList,
    batches: BatchSet,
    forwarder: Forwarder,
    limiter: RateLimiter,
    flows: SharedFlowTable,
    metrics: Arc<DataplaneMetrics>,
    clock: DataplaneClock,
    burst_size: usize,
    drain_interval: Duration,
    core: Option<usize>,
    last_flush: Instant,
    rx_buf: Vec<PacketBuf>,
}

impl PortDispatchLoop {
    /// Set up a worker. Fails if the shared flow table has not been created
    /// or a port has no usable peer.
    pub fn new(
        config: WorkerConfig,
        ports: PortList,
        forwarder: Forwarder,
        limiter: RateLimiter,
        registry: &FlowTableRegistry,
        metrics: Arc<DataplaneMetrics>,
        clock: DataplaneClock,
    ) -> Result<Self> {
        let flows = registry.find_existing(FLOW_TABLE_NAME)?;
        let burst_size = config.burst_size.max(1);

        let mut batches = BatchSet::new();
        for &rx in &config.rx_ports {
            if rx >= ports.len() {
                return Err(Error::PortNotFound(rx));
            }
            let tx = forwarder.output_port(rx).ok_or(Error::PortNotFound(rx))?;
            let port = ports.get(tx).ok_or(Error::PortNotFound(tx))?;
            batches.ensure(tx, port.clone(), burst_size);
        }

        Ok(Self {
            id: config.id,
            rx_ports: config.rx_ports,
            ports,
            batches,
            forwarder,
            limiter,
            flows,
            metrics,
            clock,
            burst_size,
            drain_interval: config.drain_interval,
            core: config.core,
            last_flush: Instant::now(),
            rx_buf: Vec::with_capacity(burst_size),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Poll until `shutdown` fires, then flush once more.
    pub fn run(&mut self, shutdown: &CancellationToken) -> Result<()> {
        if self.rx_ports.is_empty() {
            info!(worker = self.id, "worker has nothing to do");
            return Ok(());
        }

        if let Some(core) = self.core {
            match pin_to_core(core) {
                Ok(()) => debug!(worker = self.id, core, "pinned worker"),
                Err(e) => warn!(worker = self.id, core, error = %e, "failed to pin worker"),
            }
        }

        let ports: Vec<&str> = self.rx_ports.iter().map(|&p| self.ports[p].name()).collect();
        info!(worker = self.id, ?ports, "entering dispatch loop");

        while !shutdown.is_cancelled() {
            if self.poll_once(Instant::now()) == 0 {
                std::hint::spin_loop();
            }
        }

        let outcome = self.flush();
        info!(
            worker = self.id,
            flushed = outcome.sent,
            "dispatch loop stopped"
        );
        Ok(())
    }

    /// One loop iteration at time `now`. Returns the number of frames received.
    pub fn poll_once(&mut self, now: Instant) -> usize {
        if now.saturating_duration_since(self.last_flush) > self.drain_interval {
            self.flush();
            self.last_flush = now;
        }

        let ts = self.clock.secs(now);
        let mut rx_buf = std::mem::take(&mut self.rx_buf);
        let mut received = 0;

        for i in 0..self.rx_ports.len() {
            let port_id = self.rx_ports[i];
            rx_buf.clear();

            if let Err(e) = self.ports[port_id].rx_burst(&mut rx_buf, self.burst_size) {
                debug!(worker = self.id, port = port_id, error = %e, "rx burst failed");
                self.metrics.rx_errors.inc();
            }

            received += rx_buf.len();
            for frame in rx_buf.drain(..) {
                self.process(port_id, frame, ts);
            }
        }

        self.rx_buf = rx_buf;
        received
    }

    /// Flush every owned batch regardless of fill.
    pub fn flush(&mut self) -> FlushOutcome {
        let outcome = self.batches.flush_all();
        self.record_flush(outcome);
        outcome
    }

    /// Frames staged but not yet transmitted
    pub fn pending(&self) -> usize {
        self.batches.pending()
    }

    fn process(&mut self, in_port: PortId, frame: PacketBuf, ts: u64) {
        self.metrics.rx_packets.inc();
        self.metrics.rx_bytes.add(frame.len() as u64);

        let (key, layout) = match PacketView::parse(&frame) {
            Ok(view) => (FlowKey::from(view.src_addr()), view.layout()),
            Err(e) => {
                trace!(worker = self.id, port = in_port, error = %e, "unparseable frame");
                self.metrics.packets_unparseable.inc();
                return;
            }
        };

        let verdict = {
            let mut flows = self.flows.lock();
            let verdict = self.limiter.check(&mut *flows, key, frame.len(), ts);
            self.metrics.flow_table_size.set(flows.len() as u64);
            verdict
        };

        match verdict {
            Verdict::Forward(admission) => {
                match admission {
                    Admission::NewFlow { evicted } => {
                        self.metrics.flows_inserted.inc();
                        if evicted {
                            self.metrics.flows_evicted.inc();
                        }
                    }
                    Admission::Uncached => self.metrics.flows_uncached.inc(),
                    Admission::Counted | Admission::WindowReset => {}
                }
                self.metrics.packets_forwarded.inc();

                match self.forwarder.forward(in_port, frame, &layout, &mut self.batches) {
                    Ok(outcome) => self.record_flush(outcome),
                    Err(e) => {
                        debug!(worker = self.id, port = in_port, error = %e, "no output batch");
                        self.metrics.tx_errors.inc();
                    }
                }
            }
            Verdict::Drop(reason) => {
                trace!(worker = self.id, ?key, ?reason, "rate limited");
                self.metrics.packets_dropped.inc();
            }
        }
    }

    fn record_flush(&self, outcome: FlushOutcome) {
        self.metrics.tx_packets.add(outcome.sent as u64);
        self.metrics.tx_errors.add(outcome.failed as u64);
    }
}

/// Restrict the calling thread to one CPU.
pub fn pin_to_core(core: usize) -> io::Result<()> {
    if core >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cpu {} out of range", core),
        ));
    }

    let ret = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
