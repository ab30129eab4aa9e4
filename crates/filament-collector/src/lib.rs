//! # Filament Collector
//!
//! Downstream consumers of transactions: the trace snapshot builder (active,
//! partial and completed captures normalized to a capture tick) and the
//! periodic aggregate builder (per-(type, name) counters, latency histogram,
//! merged timer tree, merged profile).
//!
//! Nothing here runs on the instrumented path; snapshot and aggregate
//! builders execute on collection threads.

pub mod aggregate;
pub mod histogram;
pub mod snapshot;

pub use aggregate::{
    Aggregate, AggregateBuilder, AggregateIntervalCollector, AggregateTimerSnapshot, ErrorPoint,
    ErrorSummary, TransactionSummary,
};
pub use histogram::LazyHistogram;
pub use snapshot::{
    create_active_snapshot, create_completed_snapshot, create_partial_snapshot, Existence,
    TraceSnapshot,
};
