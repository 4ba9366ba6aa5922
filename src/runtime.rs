//! Process bring-up
//!
//! Opens the ports, creates the shared flow table, starts one dispatch
//! thread per worker and the stats reporter, and tears everything down when
//! the shutdown token fires.

use crate::config::{Config, PortsConfig};
use crate::dataplane::{
    DataplaneClock, FlowTableRegistry, Forwarder, PortDispatchLoop, RateLimiter, WorkerConfig,
    FLOW_TABLE_NAME,
};
use crate::port::{assign_ports, AfPacketPort, Port, PortList};
use crate::telemetry::{report_totals, DataplaneMetrics, StatsCollector, REPORT_INTERVAL};
use crate::{Error, Result};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Open an AF_PACKET port for every configured interface, in order
pub fn open_ports(config: &PortsConfig) -> Result<PortList> {
    let ports = config
        .interfaces
        .iter()
        .map(|name| {
            AfPacketPort::open(name, config.promiscuous).map(|p| Arc::new(p) as Arc<dyn Port>)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ports.into())
}

/// Everything the workers share, ready to start
pub struct Dataplane {
    ports: PortList,
    workers: Vec<WorkerConfig>,
    forwarder: Forwarder,
    limiter: RateLimiter,
    registry: Arc<FlowTableRegistry>,
    metrics: Arc<DataplaneMetrics>,
    clock: DataplaneClock,
    print_stats: bool,
    stats_interval: Duration,
}

impl Dataplane {
    /// `ports` must be in the order of `config.ports.interfaces`.
    pub fn build(config: &Config, ports: PortList) -> Result<Self> {
        if ports.len() != config.ports.interfaces.len() {
            return Err(Error::Config(format!(
                "{} ports opened for {} configured interfaces",
                ports.len(),
                config.ports.interfaces.len()
            )));
        }

        let dp = &config.dataplane;
        let port_map = config.ports.port_map()?;
        let num_workers = dp.worker_count(ports.len()).max(dp.cores.len());
        let assignment = assign_ports(ports.len(), num_workers, dp.ports_per_worker)?;

        let workers = assignment
            .into_iter()
            .enumerate()
            .map(|(id, rx_ports)| WorkerConfig {
                id,
                rx_ports,
                burst_size: dp.burst_size,
                drain_interval: dp.drain_interval(),
                core: dp.cores.get(id).copied(),
            })
            .collect();

        let registry = Arc::new(FlowTableRegistry::new());
        registry.create(FLOW_TABLE_NAME, dp.flow_table_capacity)?;

        let limiter = RateLimiter::new(config.limits.pps, config.limits.bps)
            .with_table_full_policy(config.limits.on_table_full);

        info!(
            pps = limiter.pps_limit(),
            bps = limiter.bps_limit(),
            flow_table_capacity = dp.flow_table_capacity,
            workers = num_workers,
            "dataplane configured"
        );

        Ok(Self {
            ports,
            workers,
            forwarder: Forwarder::new(Arc::new(port_map)),
            limiter,
            registry,
            metrics: Arc::new(DataplaneMetrics::new()),
            clock: DataplaneClock::new(),
            print_stats: config.stats.enabled,
            stats_interval: REPORT_INTERVAL,
        })
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn metrics(&self) -> Arc<DataplaneMetrics> {
        self.metrics.clone()
    }

    pub fn registry(&self) -> Arc<FlowTableRegistry> {
        self.registry.clone()
    }

    pub fn workers(&self) -> &[WorkerConfig] {
        &self.workers
    }

    /// Start one named thread per worker. A worker that fails cancels
    /// `shutdown` so the others stop too.
    pub fn spawn_workers(&self, shutdown: &CancellationToken) -> Result<Workers> {
        let mut handles = Vec::with_capacity(self.workers.len());

        for config in &self.workers {
            let id = config.id;
            let config = config.clone();
            let ports = self.ports.clone();
            let forwarder = self.forwarder.clone();
            let limiter = self.limiter;
            let registry = self.registry.clone();
            let metrics = self.metrics.clone();
            let clock = self.clock;
            let token = shutdown.clone();

            let spawned = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || {
                    let result = PortDispatchLoop::new(
                        config, ports, forwarder, limiter, &registry, metrics, clock,
                    )
                    .and_then(|mut worker| worker.run(&token));

                    if let Err(e) = &result {
                        error!(worker = id, error = %e, "worker failed");
                        token.cancel();
                    }
                    result
                });

            match spawned {
                Ok(handle) => handles.push((id, handle)),
                Err(e) => {
                    shutdown.cancel();
                    Workers { handles }.join().ok();
                    return Err(Error::Io(e));
                }
            }
        }

        Ok(Workers { handles })
    }

    /// Run until `shutdown` fires or a worker fails, then report totals.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let workers = self.spawn_workers(&shutdown)?;

        let stats = self.print_stats.then(|| {
            tokio::spawn(StatsCollector::new().run(
                self.metrics.clone(),
                self.stats_interval,
                shutdown.clone(),
            ))
        });

        let result = tokio::task::spawn_blocking(move || workers.join())
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))
            .and_then(|r| r);

        shutdown.cancel();
        if let Some(stats) = stats {
            let _ = stats.await;
        }

        report_totals(&self.metrics);
        result
    }
}

/// Running worker threads
pub struct Workers {
    handles: Vec<(usize, JoinHandle<Result<()>>)>,
}

impl Workers {
    /// Wait for every worker. Returns the first failure.
    pub fn join(self) -> Result<()> {
        let mut first_err = None;
        for (id, handle) in self.handles {
            let result = match handle.join() {
                Ok(result) => result,
                Err(_) => Err(Error::WorkerPanicked(id)),
            };
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
pub async fn shutdown_on_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            None
        }
    };
    let sigterm = async {
        match terminate.as_mut() {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm => info!("received SIGTERM, shutting down"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}

/// Bring the dataplane up on the configured interfaces and run it until a
/// signal arrives.
pub fn run(config: &Config) -> Result<()> {
    let ports = open_ports(&config.ports)?;
    let dataplane = Dataplane::build(config, ports)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("ratefwd-ctl")
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let shutdown = CancellationToken::new();
        tokio::spawn(shutdown_on_signal(shutdown.clone()));
        dataplane.serve(shutdown).await
    })
}
