//! Test fixtures and harness factories
//!
//! Builds a fully-wired engine with deterministic time and mock ports so
//! integration tests exercise the facade exactly the way instrumentation
//! points do.

use crate::mocks::{FakeClock, FakeTicker, MockCollector, MockUserProfileScheduler};
use filament_config::{AdvancedConfig, ConfigService, PluginConfig};
use filament_core::{constant_message, SystemClock, TimerName, TimerNameCache, Transaction};
use filament_engine::{PluginServices, TransactionRegistry};
use std::sync::Arc;

/// Fully-wired engine with deterministic time and mock ports.
pub struct TestHarness {
    pub services: Arc<PluginServices>,
    pub registry: Arc<TransactionRegistry>,
    pub collector: Arc<MockCollector>,
    pub config: Arc<ConfigService>,
    pub scheduler: Arc<MockUserProfileScheduler>,
    pub ticker: Arc<FakeTicker>,
    pub clock: Arc<FakeClock>,
}

/// Harness with default config and no plugin binding.
pub fn test_harness() -> TestHarness {
    test_harness_with(ConfigService::new(), None)
}

/// Harness with a specific entry cap.
pub fn test_harness_with_max_entries(max_entries: usize) -> TestHarness {
    let config = ConfigService::new();
    config.update_advanced_config(AdvancedConfig {
        max_trace_entries_per_transaction: max_entries,
        ..AdvancedConfig::default()
    });
    test_harness_with(config, None)
}

/// Harness bound to a plugin id; the plugin config must already be in the
/// given service for the binding to take.
pub fn test_harness_with(config: ConfigService, plugin_id: Option<&str>) -> TestHarness {
    let config = Arc::new(config);
    let registry = Arc::new(TransactionRegistry::new());
    let collector = Arc::new(MockCollector::observing_registry(Arc::clone(&registry)));
    let scheduler = Arc::new(MockUserProfileScheduler::new());
    let ticker = Arc::new(FakeTicker::new());
    let clock = Arc::new(FakeClock::new());
    clock.set_millis(1_700_000_000_000);
    let collector_port: filament_ports::TransactionCollectorRef = collector.clone();
    let scheduler_port: filament_ports::UserProfileSchedulerRef = scheduler.clone();
    let ticker_port: Arc<dyn filament_core::Ticker> = ticker.clone();
    let clock_port: Arc<dyn filament_core::Clock> = clock.clone();
    let services = PluginServices::create(
        Arc::clone(&registry),
        collector_port,
        Arc::clone(&config),
        Arc::new(TimerNameCache::new()),
        None,
        None,
        scheduler_port,
        ticker_port,
        clock_port,
        plugin_id,
    );
    TestHarness {
        services,
        registry,
        collector,
        config,
        scheduler,
        ticker,
        clock,
    }
}

/// Harness pre-populated with one plugin config and bound to it.
pub fn test_harness_with_plugin(plugin: PluginConfig) -> TestHarness {
    let id = plugin.id.clone();
    test_harness_with(ConfigService::with_plugins([plugin]), Some(&id))
}

/// A standalone completed transaction for collector-side tests.
///
/// Runs for `duration_micros`; `error` attaches a transaction error.
pub fn completed_transaction(
    transaction_type: &str,
    transaction_name: &str,
    duration_micros: u64,
    error: Option<&str>,
) -> Arc<Transaction> {
    let txn = Arc::new(Transaction::new(
        transaction_type,
        transaction_name,
        constant_message(transaction_name),
        TimerName::new("http request"),
        1_700_000_000_000,
        0,
        Arc::new(SystemClock::new()),
        None,
        None,
    ));
    if let Some(error) = error {
        txn.set_error(error);
    }
    txn.pop_entry(txn.root_entry_id(), duration_micros * 1_000, None);
    txn
}
