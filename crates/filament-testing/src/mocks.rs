//! Mock implementations of the engine's ports
//!
//! - [`FakeTicker`] / [`FakeClock`] - deterministic time sources
//! - [`MockCollector`] - records completed transactions
//! - [`MockUserProfileScheduler`] - counts scheduling calls, installs a
//!   cancellable task
//! - [`FixedThreadStatsProbe`] / [`FixedGcStatsProbe`] - scripted probe
//!   readings

use filament_core::{
    Clock, GcActivity, GcStatsProbe, ScheduledTask, ThreadStats, ThreadStatsProbe, Ticker,
    Transaction,
};
use filament_ports::{TransactionCollector, UserProfileScheduler};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Manually-advanced monotonic ticker.
#[derive(Debug, Default)]
pub struct FakeTicker {
    nanos: AtomicU64,
}

impl FakeTicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn advance_nanos(&self, nanos: u64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Ticker for FakeTicker {
    fn read_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Manually-set wall clock.
#[derive(Debug, Default)]
pub struct FakeClock {
    millis: AtomicI64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn current_time_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Collector that records every completed transaction it receives, plus the
/// registry size observed at callback time so tests can assert the
/// collector-before-deregister ordering. Installs an immediate-store task on
/// every starting transaction, the way a partial-store collector does.
#[derive(Default)]
pub struct MockCollector {
    completed: Mutex<Vec<Arc<Transaction>>>,
    registry_sizes_at_callback: Mutex<Vec<usize>>,
    registry: Mutex<Option<Arc<filament_engine::TransactionRegistry>>>,
    immediate_store_tasks: Mutex<Vec<Arc<MockScheduledTask>>>,
}

impl MockCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the given registry's size at every callback.
    pub fn observing_registry(registry: Arc<filament_engine::TransactionRegistry>) -> Self {
        let collector = Self::new();
        *collector.registry.lock() = Some(registry);
        collector
    }

    pub fn completed_count(&self) -> usize {
        self.completed.lock().len()
    }

    pub fn completed(&self) -> Vec<Arc<Transaction>> {
        self.completed.lock().clone()
    }

    /// Registry sizes observed when callbacks ran, in callback order.
    pub fn registry_sizes_at_callback(&self) -> Vec<usize> {
        self.registry_sizes_at_callback.lock().clone()
    }

    /// Immediate-store tasks installed on starting transactions.
    pub fn immediate_store_tasks(&self) -> Vec<Arc<MockScheduledTask>> {
        self.immediate_store_tasks.lock().clone()
    }
}

impl TransactionCollector for MockCollector {
    fn on_transaction_start(&self, transaction: &Arc<Transaction>) {
        let task = Arc::new(MockScheduledTask::default());
        self.immediate_store_tasks.lock().push(Arc::clone(&task));
        transaction.set_immediate_store_task(Box::new(task));
    }

    fn on_completed_transaction(&self, transaction: &Arc<Transaction>) {
        if let Some(registry) = self.registry.lock().as_ref() {
            self.registry_sizes_at_callback.lock().push(registry.len());
        }
        self.completed.lock().push(Arc::clone(transaction));
    }

    fn pending_complete_transactions(&self) -> Vec<Arc<Transaction>> {
        self.completed.lock().clone()
    }
}

/// Cancellable task handle that records cancellation.
#[derive(Debug, Default)]
pub struct MockScheduledTask {
    cancelled: AtomicBool,
}

impl MockScheduledTask {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl ScheduledTask for MockScheduledTask {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Scheduler that counts calls and installs a [`MockScheduledTask`] on the
/// transaction, mirroring a real profiling scheduler.
#[derive(Default)]
pub struct MockUserProfileScheduler {
    calls: AtomicUsize,
    tasks: Mutex<Vec<Arc<MockScheduledTask>>>,
}

impl MockUserProfileScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn tasks(&self) -> Vec<Arc<MockScheduledTask>> {
        self.tasks.lock().clone()
    }
}

impl UserProfileScheduler for MockUserProfileScheduler {
    fn maybe_schedule_user_profiling(&self, transaction: &Arc<Transaction>, _user: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let task = Arc::new(MockScheduledTask::default());
        self.tasks.lock().push(Arc::clone(&task));
        transaction.set_user_profile_task(Box::new(task));
    }
}

/// Probe that replays scripted readings, repeating the last one.
#[derive(Debug)]
pub struct FixedThreadStatsProbe {
    readings: Mutex<Vec<ThreadStats>>,
}

impl FixedThreadStatsProbe {
    pub fn new(readings: Vec<ThreadStats>) -> Self {
        assert!(!readings.is_empty(), "at least one reading required");
        Self {
            readings: Mutex::new(readings),
        }
    }
}

impl ThreadStatsProbe for FixedThreadStatsProbe {
    fn read(&self) -> ThreadStats {
        let mut readings = self.readings.lock();
        if readings.len() > 1 {
            readings.remove(0)
        } else {
            readings[0]
        }
    }
}

/// GC probe that replays scripted readings, repeating the last one.
#[derive(Debug)]
pub struct FixedGcStatsProbe {
    readings: Mutex<Vec<Vec<GcActivity>>>,
}

impl FixedGcStatsProbe {
    pub fn new(readings: Vec<Vec<GcActivity>>) -> Self {
        assert!(!readings.is_empty(), "at least one reading required");
        Self {
            readings: Mutex::new(readings),
        }
    }
}

impl GcStatsProbe for FixedGcStatsProbe {
    fn read(&self) -> Vec<GcActivity> {
        let mut readings = self.readings.lock();
        if readings.len() > 1 {
            readings.remove(0)
        } else {
            readings[0].clone()
        }
    }
}
