//! Periodic forwarded/dropped report

use super::metrics::{DataplaneMetrics, Totals};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Turns successive counter totals into per-interval deltas.
#[derive(Debug, Default)]
pub struct StatsCollector {
    last: Totals,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta since the previous sample. The new totals become the baseline.
    pub fn sample(&mut self, current: Totals) -> Totals {
        let delta = Totals {
            forwarded: current.forwarded.saturating_sub(self.last.forwarded),
            dropped: current.dropped.saturating_sub(self.last.dropped),
        };
        self.last = current;
        delta
    }

    /// Report deltas every `interval` until `shutdown` fires.
    ///
    /// The first report covers everything counted since the collector was
    /// created, including packets handled before the task was first polled.
    pub async fn run(
        mut self,
        metrics: Arc<DataplaneMetrics>,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let delta = self.sample(metrics.snapshot());
                    info!("Forward => {}. Drop => {}.", delta.forwarded, delta.dropped);
                }
            }
        }
    }
}

/// Final totals, reported once at exit.
pub fn report_totals(metrics: &DataplaneMetrics) {
    let totals = metrics.snapshot();
    info!(
        unparseable = metrics.packets_unparseable.get(),
        tx_errors = metrics.tx_errors.get(),
        flows_evicted = metrics.flows_evicted.get(),
        "Total packets forwarded: {}. Total packets dropped: {}.",
        totals.forwarded,
        totals.dropped
    );
}
