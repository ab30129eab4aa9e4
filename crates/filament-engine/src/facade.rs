//! Instrumentation facade
//!
//! The operations instrumentation points call on enter/return/throw/after.
//! Every operation validates its arguments, never blocks, and never lets an
//! error escape into host code: invalid input logs at error and returns a
//! no-op sentinel. Hot config fields are cached here and refreshed by the
//! config-change callback, so the instrumented path reads only atomics.

use crate::registry::TransactionRegistry;
use filament_config::{ConfigListener, ConfigService, PluginConfig};
use filament_core::{
    CapturedStackTrace, Clock, EntryId, ErrorMessage, GcStatsProbe, MessageSupplier,
    ThreadStatsProbe, Ticker, TimerId, TimerName, TimerNameCache, Transaction,
};
use filament_ports::{TransactionCollectorRef, UserProfileSchedulerRef};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Cached hot config fields, written by the config-change callback and read
/// on every facade operation.
struct ConfigCache {
    enabled: AtomicBool,
    capture_thread_info: AtomicBool,
    capture_gc_info: AtomicBool,
    max_trace_entries: AtomicUsize,
    plugin_config: RwLock<Option<PluginConfig>>,
}

/// State shared between the facade and the entry/timer handles it returns:
/// everything an `end` call needs, including the completion cascade.
struct EngineShared {
    registry: Arc<TransactionRegistry>,
    collector: TransactionCollectorRef,
    ticker: Arc<dyn Ticker>,
    cache: ConfigCache,
}

impl EngineShared {
    fn max_trace_entries(&self) -> u64 {
        self.cache.max_trace_entries.load(Ordering::SeqCst) as u64
    }

    /// Completion cascade, run when the root entry is popped.
    ///
    /// The collector must see the transaction before it leaves the registry
    /// so its pending-trace list bridges the deregister-to-store window for
    /// consumers enumerating live transactions.
    fn complete_transaction(&self, transaction: &Arc<Transaction>) {
        transaction.cancel_scheduled_tasks();
        self.collector.on_completed_transaction(transaction);
        self.registry.remove_transaction(transaction);
    }
}

/// The plugin-facing service surface.
///
/// One instance per plugin (or one unbound instance for the engine's own
/// instrumentation). Created through [`PluginServices::create`], which wires
/// the instance into config-change notifications before seeding the cache.
pub struct PluginServices {
    shared: Arc<EngineShared>,
    config_service: Arc<ConfigService>,
    timer_names: Arc<TimerNameCache>,
    thread_stats_probe: Option<Arc<dyn ThreadStatsProbe>>,
    gc_stats_probe: Option<Arc<dyn GcStatsProbe>>,
    user_profile_scheduler: UserProfileSchedulerRef,
    clock: Arc<dyn Clock>,
    /// Id of a registered plugin, or `None` (unbound mode; validated at
    /// construction).
    plugin_id: Option<String>,
}

impl std::fmt::Debug for PluginServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginServices")
            .field("plugin_id", &self.plugin_id)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl PluginServices {
    /// Create a facade instance and wire it into config notifications.
    ///
    /// Listeners are registered before the cached values are seeded to avoid
    /// a config-change race at startup. An unknown plugin id logs at warn and
    /// downgrades to unbound mode.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        registry: Arc<TransactionRegistry>,
        collector: TransactionCollectorRef,
        config_service: Arc<ConfigService>,
        timer_names: Arc<TimerNameCache>,
        thread_stats_probe: Option<Arc<dyn ThreadStatsProbe>>,
        gc_stats_probe: Option<Arc<dyn GcStatsProbe>>,
        user_profile_scheduler: UserProfileSchedulerRef,
        ticker: Arc<dyn Ticker>,
        clock: Arc<dyn Clock>,
        plugin_id: Option<&str>,
    ) -> Arc<PluginServices> {
        let plugin_id = plugin_id.and_then(|id| {
            if config_service.plugin_config(id).is_some() {
                Some(id.to_string())
            } else {
                warn!(
                    plugin_id = id,
                    known = ?config_service.plugin_ids(),
                    "unexpected plugin id; continuing without plugin binding"
                );
                None
            }
        });
        let services = Arc::new(PluginServices {
            shared: Arc::new(EngineShared {
                registry,
                collector,
                ticker,
                cache: ConfigCache {
                    enabled: AtomicBool::new(false),
                    capture_thread_info: AtomicBool::new(false),
                    capture_gc_info: AtomicBool::new(false),
                    max_trace_entries: AtomicUsize::new(0),
                    plugin_config: RwLock::new(None),
                },
            }),
            config_service: Arc::clone(&config_service),
            timer_names,
            thread_stats_probe,
            gc_stats_probe,
            user_profile_scheduler,
            clock,
            plugin_id,
        });
        let listener: Arc<dyn ConfigListener> = services.clone();
        config_service.add_config_listener(Arc::clone(&listener));
        if let Some(id) = services.plugin_id.clone() {
            config_service.add_plugin_config_listener(&id, listener);
        }
        services.on_change();
        services
    }

    // ------------------------------------------------------------------
    // Config surface
    // ------------------------------------------------------------------

    pub fn is_enabled(&self) -> bool {
        self.shared.cache.enabled.load(Ordering::SeqCst)
    }

    pub fn get_string_property(&self, name: &str) -> String {
        if name.is_empty() {
            error!("get_string_property(): argument 'name' must be non-empty");
            return String::new();
        }
        self.shared
            .cache
            .plugin_config
            .read()
            .as_ref()
            .map(|config| config.string_property(name))
            .unwrap_or_default()
    }

    pub fn get_boolean_property(&self, name: &str) -> bool {
        if name.is_empty() {
            error!("get_boolean_property(): argument 'name' must be non-empty");
            return false;
        }
        self.shared
            .cache
            .plugin_config
            .read()
            .as_ref()
            .is_some_and(|config| config.boolean_property(name))
    }

    pub fn get_double_property(&self, name: &str) -> Option<f64> {
        if name.is_empty() {
            error!("get_double_property(): argument 'name' must be non-empty");
            return None;
        }
        self.shared
            .cache
            .plugin_config
            .read()
            .as_ref()
            .and_then(|config| config.double_property(name))
    }

    /// Route plugin-config changes to a plugin-supplied listener. No-op when
    /// no plugin is bound.
    pub fn register_config_listener(&self, listener: Arc<dyn ConfigListener>) {
        let Some(plugin_id) = &self.plugin_id else {
            return;
        };
        self.config_service
            .add_plugin_config_listener(plugin_id, listener);
    }

    /// Interned timer name for an advice identity.
    pub fn get_timer_name(&self, advice: &'static str) -> TimerName {
        self.timer_names.name_for(advice)
    }

    // ------------------------------------------------------------------
    // Transaction and entry lifecycle
    // ------------------------------------------------------------------

    /// Start a transaction, or behave as [`start_trace_entry`] when the
    /// thread is already inside one - transactions do not nest.
    ///
    /// [`start_trace_entry`]: PluginServices::start_trace_entry
    pub fn start_transaction(
        &self,
        transaction_type: &str,
        transaction_name: &str,
        message_supplier: Arc<dyn MessageSupplier>,
        timer_name: &TimerName,
    ) -> EntryHandle {
        if transaction_type.is_empty() {
            error!("start_transaction(): argument 'transaction_type' must be non-empty");
            return EntryHandle::Nop;
        }
        if transaction_name.is_empty() {
            error!("start_transaction(): argument 'transaction_name' must be non-empty");
            return EntryHandle::Nop;
        }
        if !self.is_enabled() {
            return EntryHandle::Nop;
        }
        if let Some(transaction) = self.shared.registry.current_transaction() {
            return self.start_trace_entry_internal(transaction, message_supplier, timer_name);
        }
        let start_tick = self.shared.ticker.read_nanos();
        let thread_stats_probe = if self.shared.cache.capture_thread_info.load(Ordering::SeqCst) {
            self.thread_stats_probe.clone()
        } else {
            None
        };
        let gc_stats_probe = if self.shared.cache.capture_gc_info.load(Ordering::SeqCst) {
            self.gc_stats_probe.clone()
        } else {
            None
        };
        let transaction = Arc::new(Transaction::new(
            transaction_type,
            transaction_name,
            message_supplier,
            timer_name.clone(),
            self.clock.current_time_millis(),
            start_tick,
            Arc::clone(&self.clock),
            thread_stats_probe,
            gc_stats_probe,
        ));
        self.shared
            .registry
            .add_transaction(Arc::clone(&transaction));
        self.shared.collector.on_transaction_start(&transaction);
        let entry = transaction.root_entry_id();
        EntryHandle::Live(LiveEntry {
            shared: Arc::clone(&self.shared),
            transaction,
            entry,
            ended: AtomicBool::new(false),
        })
    }

    /// Start an entry within the current transaction; no-op handle when the
    /// thread is not in one.
    pub fn start_trace_entry(
        &self,
        message_supplier: Arc<dyn MessageSupplier>,
        timer_name: &TimerName,
    ) -> EntryHandle {
        let Some(transaction) = self.shared.registry.current_transaction() else {
            return EntryHandle::Nop;
        };
        self.start_trace_entry_internal(transaction, message_supplier, timer_name)
    }

    fn start_trace_entry_internal(
        &self,
        transaction: Arc<Transaction>,
        message_supplier: Arc<dyn MessageSupplier>,
        timer_name: &TimerName,
    ) -> EntryHandle {
        let start_tick = self.shared.ticker.read_nanos();
        if transaction.entry_count() >= self.shared.max_trace_entries() {
            // the entry limit has been exceeded for this transaction; keep
            // timing through a dummy handle but add nothing to the tree
            transaction.add_entry_limit_exceeded_marker_if_needed(start_tick);
            transaction.increment_entry_count();
            let timer = transaction.start_nested_timer(timer_name, start_tick);
            EntryHandle::Dummy(DummyEntry {
                shared: Arc::clone(&self.shared),
                transaction,
                timer,
                start_tick,
                message: message_supplier,
                ended: AtomicBool::new(false),
            })
        } else {
            let timer = transaction.start_nested_timer(timer_name, start_tick);
            let entry = transaction.push_entry(start_tick, message_supplier, timer);
            EntryHandle::Live(LiveEntry {
                shared: Arc::clone(&self.shared),
                transaction,
                entry,
                ended: AtomicBool::new(false),
            })
        }
    }

    /// Start a nested timer without an entry.
    pub fn start_timer(&self, timer_name: &TimerName) -> TimerHandle {
        let Some(transaction) = self.shared.registry.current_transaction() else {
            return TimerHandle::Nop;
        };
        let start_tick = self.shared.ticker.read_nanos();
        let timer = transaction.start_nested_timer(timer_name, start_tick);
        TimerHandle::Live(LiveTimer {
            transaction,
            timer,
            ticker: Arc::clone(&self.shared.ticker),
            stopped: AtomicBool::new(false),
        })
    }

    /// Append a zero-duration error entry to the current transaction.
    ///
    /// Errors get twice the normal entry budget. When the error carries no
    /// exception a stack trace is captured, stripped of facade frames.
    pub fn add_trace_entry(&self, error_message: ErrorMessage) {
        if error_message.is_empty() {
            error!("add_trace_entry(): argument 'error_message' must be non-empty");
            return;
        }
        let Some(transaction) = self.shared.registry.current_transaction() else {
            return;
        };
        if transaction.entry_count() < 2 * self.shared.max_trace_entries() {
            let tick = self.shared.ticker.read_nanos();
            let capture_stack = error_message.exception.is_none();
            let entry = transaction.add_entry(tick, tick, None, Some(error_message));
            if capture_stack {
                transaction.set_entry_stack_trace(entry, capture_stack_trace());
            }
        }
    }

    // ------------------------------------------------------------------
    // Transaction mutators
    // ------------------------------------------------------------------

    pub fn set_transaction_type(&self, transaction_type: &str) {
        if let Some(transaction) = self.shared.registry.current_transaction() {
            transaction.set_transaction_type(transaction_type);
        }
    }

    pub fn set_transaction_name(&self, transaction_name: &str) {
        if let Some(transaction) = self.shared.registry.current_transaction() {
            transaction.set_transaction_name(transaction_name);
        }
    }

    pub fn set_transaction_error(&self, error: &str) {
        if let Some(transaction) = self.shared.registry.current_transaction() {
            transaction.set_error(error);
        }
    }

    /// Set the transaction user; the first assignment may schedule user
    /// profiling.
    pub fn set_transaction_user(&self, user: &str) {
        let Some(transaction) = self.shared.registry.current_transaction() else {
            return;
        };
        if user.is_empty() {
            return;
        }
        transaction.set_user(user);
        if !transaction.has_user_profile_task() {
            self.user_profile_scheduler
                .maybe_schedule_user_profiling(&transaction, user);
        }
    }

    pub fn set_transaction_custom_attribute(&self, name: &str, value: &str) {
        if name.is_empty() {
            error!("set_transaction_custom_attribute(): argument 'name' must be non-empty");
            return;
        }
        if let Some(transaction) = self.shared.registry.current_transaction() {
            transaction.put_custom_attribute(name, value);
        }
    }

    pub fn set_transaction_custom_detail(&self, name: &str, value: serde_json::Value) {
        if name.is_empty() {
            error!("set_transaction_custom_detail(): argument 'name' must be non-empty");
            return;
        }
        if let Some(transaction) = self.shared.registry.current_transaction() {
            transaction.put_custom_detail(name, value);
        }
    }

    /// Per-transaction trace-store threshold override, saturated to u32
    /// millis.
    pub fn set_trace_store_threshold(&self, threshold: Duration) {
        if let Some(transaction) = self.shared.registry.current_transaction() {
            let millis = threshold.as_millis().min(u32::MAX as u128) as u32;
            transaction.set_store_threshold_millis_override(millis);
        }
    }

    pub fn is_in_transaction(&self) -> bool {
        self.shared.registry.current_transaction().is_some()
    }

    fn refresh_config_cache(&self) {
        let cache = &self.shared.cache;
        let general = self.config_service.general_config();
        match &self.plugin_id {
            None => {
                cache.enabled.store(general.enabled, Ordering::SeqCst);
            }
            Some(plugin_id) => match self.config_service.plugin_config(plugin_id) {
                Some(plugin_config) => {
                    cache
                        .enabled
                        .store(general.enabled && plugin_config.enabled, Ordering::SeqCst);
                    *cache.plugin_config.write() = Some(plugin_config);
                }
                None => {
                    // plugin configs cannot be removed at runtime; seen only
                    // if the config service is swapped out under us
                    warn!(plugin_id = %plugin_id, "plugin config missing on refresh");
                    cache.enabled.store(general.enabled, Ordering::SeqCst);
                }
            },
        }
        let advanced = self.config_service.advanced_config();
        cache
            .max_trace_entries
            .store(advanced.max_trace_entries_per_transaction, Ordering::SeqCst);
        cache
            .capture_thread_info
            .store(advanced.capture_thread_info, Ordering::SeqCst);
        cache
            .capture_gc_info
            .store(advanced.capture_gc_info, Ordering::SeqCst);
    }
}

impl ConfigListener for PluginServices {
    fn on_change(&self) {
        self.refresh_config_cache();
    }
}

/// Capture the calling thread's stack, stripped of this module's frames.
fn capture_stack_trace() -> CapturedStackTrace {
    CapturedStackTrace::capture_stripped(&[
        "filament_engine::facade",
        "<filament_engine::facade",
    ])
}

// ----------------------------------------------------------------------
// Entry handles
// ----------------------------------------------------------------------

/// Handle to a started entry.
///
/// Three variants share one capability set: live (a real entry in the
/// tree), dummy (cap exceeded; only the timer is real) and no-op (disabled
/// or invalid arguments). The handle is ended exactly once; later end calls
/// log at warn and do nothing.
pub enum EntryHandle {
    Live(LiveEntry),
    Dummy(DummyEntry),
    Nop,
}

impl std::fmt::Debug for EntryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryHandle::Live(_) => f.write_str("EntryHandle::Live"),
            EntryHandle::Dummy(_) => f.write_str("EntryHandle::Dummy"),
            EntryHandle::Nop => f.write_str("EntryHandle::Nop"),
        }
    }
}

impl EntryHandle {
    /// End the entry at the current tick.
    pub fn end(&self) {
        match self {
            EntryHandle::Live(live) => live.end_internal(None, None),
            EntryHandle::Dummy(dummy) => dummy.end(),
            EntryHandle::Nop => {}
        }
    }

    /// End the entry; when it ran at least `threshold`, attach a stack trace
    /// stripped of facade frames.
    pub fn end_with_stack_trace(&self, threshold: Duration) {
        match self {
            EntryHandle::Live(live) => live.end_internal(None, Some(threshold)),
            EntryHandle::Dummy(dummy) => dummy.end_with_stack_trace(threshold),
            EntryHandle::Nop => {}
        }
    }

    /// End the entry with an error attached.
    pub fn end_with_error(&self, error_message: ErrorMessage) {
        match self {
            EntryHandle::Live(live) => {
                if error_message.is_empty() {
                    error!("end_with_error(): argument 'error_message' must be non-empty");
                    live.end_internal(None, None);
                } else {
                    live.end_internal(Some(error_message), None);
                }
            }
            EntryHandle::Dummy(dummy) => dummy.end_with_error(error_message),
            EntryHandle::Nop => {}
        }
    }

    /// The message supplier captured at start; `None` for the no-op handle.
    pub fn message_supplier(&self) -> Option<Arc<dyn MessageSupplier>> {
        match self {
            EntryHandle::Live(live) => live.transaction.entry_message(live.entry),
            EntryHandle::Dummy(dummy) => Some(Arc::clone(&dummy.message)),
            EntryHandle::Nop => None,
        }
    }

    pub fn is_nop(&self) -> bool {
        matches!(self, EntryHandle::Nop)
    }
}

/// Handle to an entry that lives in the transaction's tree.
pub struct LiveEntry {
    shared: Arc<EngineShared>,
    transaction: Arc<Transaction>,
    entry: EntryId,
    ended: AtomicBool,
}

impl LiveEntry {
    fn end_internal(&self, error: Option<ErrorMessage>, stack_threshold: Option<Duration>) {
        if self.ended.swap(true, Ordering::SeqCst) {
            warn!("end called more than once on a trace entry");
            return;
        }
        let end_tick = self.shared.ticker.read_nanos();
        if let Some(threshold) = stack_threshold {
            let start_tick = self.transaction.entry_start_tick(self.entry);
            if end_tick.saturating_sub(start_tick) >= threshold.as_nanos() as u64 {
                self.transaction
                    .set_entry_stack_trace(self.entry, capture_stack_trace());
            }
        }
        let completed = self.transaction.pop_entry(self.entry, end_tick, error);
        if completed {
            self.shared.complete_transaction(&self.transaction);
        }
    }
}

/// Handle returned once the entry cap is exceeded: stops its timer but owns
/// no entry. Slow and erroring operations can still materialize a flat entry
/// under the doubled cap.
pub struct DummyEntry {
    shared: Arc<EngineShared>,
    transaction: Arc<Transaction>,
    timer: TimerId,
    start_tick: u64,
    message: Arc<dyn MessageSupplier>,
    ended: AtomicBool,
}

impl DummyEntry {
    fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            warn!("end called more than once on a trace entry");
            return;
        }
        let end_tick = self.shared.ticker.read_nanos();
        self.transaction.stop_timer(self.timer, end_tick);
    }

    fn end_with_stack_trace(&self, threshold: Duration) {
        if self.ended.swap(true, Ordering::SeqCst) {
            warn!("end called more than once on a trace entry");
            return;
        }
        let end_tick = self.shared.ticker.read_nanos();
        self.transaction.stop_timer(self.timer, end_tick);
        // slow entries get the doubled budget; the flat entry is not nested
        // properly but the duration and stack trace survive
        if end_tick.saturating_sub(self.start_tick) >= threshold.as_nanos() as u64
            && self.transaction.entry_count() < 2 * self.shared.max_trace_entries()
        {
            let entry = self.transaction.add_entry(
                self.start_tick,
                end_tick,
                Some(Arc::clone(&self.message)),
                None,
            );
            self.transaction
                .set_entry_stack_trace(entry, capture_stack_trace());
        }
    }

    fn end_with_error(&self, error_message: ErrorMessage) {
        if error_message.is_empty() {
            error!("end_with_error(): argument 'error_message' must be non-empty");
            self.end();
            return;
        }
        if self.ended.swap(true, Ordering::SeqCst) {
            warn!("end called more than once on a trace entry");
            return;
        }
        let end_tick = self.shared.ticker.read_nanos();
        self.transaction.stop_timer(self.timer, end_tick);
        if self.transaction.entry_count() < 2 * self.shared.max_trace_entries() {
            self.transaction.add_entry(
                self.start_tick,
                end_tick,
                Some(Arc::clone(&self.message)),
                Some(error_message),
            );
        }
    }
}

// ----------------------------------------------------------------------
// Timer handles
// ----------------------------------------------------------------------

/// Handle to a started timer; live or no-op.
pub enum TimerHandle {
    Live(LiveTimer),
    Nop,
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerHandle::Live(_) => f.write_str("TimerHandle::Live"),
            TimerHandle::Nop => f.write_str("TimerHandle::Nop"),
        }
    }
}

impl TimerHandle {
    pub fn stop(&self) {
        match self {
            TimerHandle::Live(live) => {
                if live.stopped.swap(true, Ordering::SeqCst) {
                    warn!("stop called more than once on a timer");
                    return;
                }
                live.transaction
                    .stop_timer(live.timer, live.ticker.read_nanos());
            }
            TimerHandle::Nop => {}
        }
    }

    pub fn is_nop(&self) -> bool {
        matches!(self, TimerHandle::Nop)
    }
}

/// Handle to a running timer in the transaction's tree.
pub struct LiveTimer {
    transaction: Arc<Transaction>,
    timer: TimerId,
    ticker: Arc<dyn Ticker>,
    stopped: AtomicBool,
}
