//! Output ports for the tracing engine
//!
//! Per Clean Architecture these are the interfaces the engine calls out
//! through; infrastructure (storage, schedulers, runtime probes) implements
//! them. Every port is synchronous: the facade is wait-free and port calls
//! happen off the instrumented path or complete in bounded time.

use filament_core::Transaction;
use std::sync::Arc;

// Probe and task ports live with the domain model; re-exported here so
// infrastructure crates depend on one place.
pub use filament_core::{GcStatsProbe, ScheduledTask, ThreadStatsProbe};

/// Receives completed transactions and pending-trace queries.
pub trait TransactionCollector: Send + Sync {
    /// Called when a transaction starts, right after it is registered.
    ///
    /// A collector that stores partial records of long-running transactions
    /// installs its immediate-store task on the transaction here; the
    /// completion cascade cancels it.
    fn on_transaction_start(&self, _transaction: &Arc<Transaction>) {}

    /// Called exactly once per completed transaction, before the transaction
    /// is removed from the live registry. That ordering lets the collector
    /// bridge the window between registry removal and storage for consumers
    /// enumerating live + pending traces.
    fn on_completed_transaction(&self, transaction: &Arc<Transaction>);

    /// Completed transactions received but not yet stored.
    fn pending_complete_transactions(&self) -> Vec<Arc<Transaction>> {
        Vec::new()
    }
}

pub type TransactionCollectorRef = Arc<dyn TransactionCollector>;

/// May install periodic stack-sampling on a transaction's thread.
pub trait UserProfileScheduler: Send + Sync {
    /// Idempotent per transaction; the facade only calls it on the first
    /// user assignment.
    fn maybe_schedule_user_profiling(&self, transaction: &Arc<Transaction>, user: &str);
}

pub type UserProfileSchedulerRef = Arc<dyn UserProfileScheduler>;

/// Scheduler that never profiles; for hosts without a sampling executor.
#[derive(Debug, Default)]
pub struct NopUserProfileScheduler;

impl UserProfileScheduler for NopUserProfileScheduler {
    fn maybe_schedule_user_profiling(&self, _transaction: &Arc<Transaction>, _user: &str) {}
}
