//! Telemetry module for logging and metrics.
//!
//! Provides:
//! - Logging configuration and initialization
//! - Dataplane counters shared by the workers
//! - The once-per-second forwarded/dropped reporter

mod logging;
mod metrics;
mod stats;

pub use logging::{init_logging, is_known_level, LogConfig, LogFormat};
pub use metrics::{Counter, DataplaneMetrics, Gauge, Totals};
pub use stats::{report_totals, StatsCollector, REPORT_INTERVAL};
