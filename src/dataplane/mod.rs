//! Data plane components
//!
//! Per-core dispatch loops classify received frames, rate-limit them per
//! source address against a shared flow table, and reflect admitted frames
//! out through the paired port.

mod dispatch;
mod flow_table;
mod forwarder;
mod output_batch;
mod rate_limiter;
mod slot_table;

pub use dispatch::{
    pin_to_core, DataplaneClock, PortDispatchLoop, WorkerConfig, FLOW_TABLE_NAME,
};
pub use flow_table::{
    FlowCache, FlowKey, FlowState, FlowTable, FlowTableRegistry, SharedFlowTable,
    DEFAULT_CAPACITY,
};
pub use forwarder::{reflect, Forwarder};
pub use output_batch::{BatchSet, FlushOutcome, OutputBatch};
pub use rate_limiter::{Admission, DropReason, RateLimiter, TableFullPolicy, Verdict};
pub use slot_table::SlotTable;
