//! Transaction - the root aggregate of one traced unit of work
//!
//! A transaction is created on one thread and all entry/timer mutation
//! happens on that thread; snapshot threads read concurrently. Tree state
//! sits behind short-critical-section mutexes and scalar state in atomics,
//! so no facade operation ever blocks on user code.

use crate::entry::{EntryId, EntrySnapshot, EntryTree};
use crate::message::{ErrorMessage, MessageSupplier};
use crate::probes::{
    GcActivity, GcInfoComponent, GcStatsProbe, ThreadInfoComponent, ThreadInfoData,
    ThreadStatsProbe,
};
use crate::profile::{Profile, ProfileSnapshot};
use crate::stack_trace::CapturedStackTrace;
use crate::task::ScheduledTask;
use crate::time::Clock;
use crate::timer::{TimerId, TimerName, TimerSnapshot, TimerTree};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// 128-bit transaction identity with a stable string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(uuid::Uuid);

impl TransactionId {
    pub fn generate() -> Self {
        TransactionId(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Classification and metadata, mutable until completion.
struct MutableState {
    transaction_type: String,
    transaction_name: String,
    user: Option<String>,
    error: Option<String>,
    /// Multi-valued attributes for indexing.
    custom_attributes: BTreeMap<String, BTreeSet<String>>,
    /// Arbitrary nested detail for display.
    custom_detail: serde_json::Map<String, serde_json::Value>,
    store_threshold_millis_override: Option<u32>,
}

/// Root aggregate owning the entry tree, the timer tree, the probes and the
/// scheduled-task handles for one traced unit of work.
pub struct Transaction {
    id: TransactionId,
    start_time_millis: i64,
    start_tick: u64,
    clock: Arc<dyn Clock>,
    state: Mutex<MutableState>,
    entries: Mutex<EntryTree>,
    timers: Mutex<TimerTree>,
    /// Total entries created, including those suppressed by the cap.
    entry_count: AtomicU64,
    completed: AtomicBool,
    end_tick: AtomicU64,
    capture_time_millis: AtomicI64,
    /// Set by the collector once it decides the trace will be stored.
    marked_for_storage: AtomicBool,
    thread_info: Option<ThreadInfoComponent>,
    gc_info: Option<GcInfoComponent>,
    profile: Mutex<Option<Profile>>,
    user_profile_task: Mutex<Option<Box<dyn ScheduledTask>>>,
    immediate_store_task: Mutex<Option<Box<dyn ScheduledTask>>>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("start_time_millis", &self.start_time_millis)
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl Transaction {
    /// Create a transaction with its root entry pushed and root timer
    /// running.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transaction_type: impl Into<String>,
        transaction_name: impl Into<String>,
        message: Arc<dyn MessageSupplier>,
        root_timer_name: TimerName,
        start_time_millis: i64,
        start_tick: u64,
        clock: Arc<dyn Clock>,
        thread_stats_probe: Option<Arc<dyn ThreadStatsProbe>>,
        gc_stats_probe: Option<Arc<dyn GcStatsProbe>>,
    ) -> Self {
        let timers = TimerTree::new(root_timer_name, start_tick);
        let root_timer = timers.root();
        Transaction {
            id: TransactionId::generate(),
            start_time_millis,
            start_tick,
            clock,
            state: Mutex::new(MutableState {
                transaction_type: transaction_type.into(),
                transaction_name: transaction_name.into(),
                user: None,
                error: None,
                custom_attributes: BTreeMap::new(),
                custom_detail: serde_json::Map::new(),
                store_threshold_millis_override: None,
            }),
            entries: Mutex::new(EntryTree::new(start_tick, message, root_timer)),
            timers: Mutex::new(timers),
            entry_count: AtomicU64::new(1),
            completed: AtomicBool::new(false),
            end_tick: AtomicU64::new(0),
            capture_time_millis: AtomicI64::new(0),
            marked_for_storage: AtomicBool::new(false),
            thread_info: thread_stats_probe.map(ThreadInfoComponent::start),
            gc_info: gc_stats_probe.map(GcInfoComponent::start),
            profile: Mutex::new(None),
            user_profile_task: Mutex::new(None),
            immediate_store_task: Mutex::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Identity and timing
    // ------------------------------------------------------------------

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn start_time_millis(&self) -> i64 {
        self.start_time_millis
    }

    pub fn start_tick(&self) -> u64 {
        self.start_tick
    }

    /// End tick, once completed.
    pub fn end_tick(&self) -> Option<u64> {
        if self.is_completed() {
            Some(self.end_tick.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    /// Wall-clock capture time set at completion.
    pub fn capture_time_millis(&self) -> Option<i64> {
        if self.is_completed() {
            Some(self.capture_time_millis.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Duration of a completed transaction; zero while still running.
    pub fn duration_nanos(&self) -> u64 {
        if self.is_completed() {
            self.end_tick
                .load(Ordering::SeqCst)
                .saturating_sub(self.start_tick)
        } else {
            0
        }
    }

    // ------------------------------------------------------------------
    // Classification and metadata
    // ------------------------------------------------------------------

    pub fn transaction_type(&self) -> String {
        self.state.lock().transaction_type.clone()
    }

    pub fn transaction_name(&self) -> String {
        self.state.lock().transaction_name.clone()
    }

    pub fn user(&self) -> Option<String> {
        self.state.lock().user.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// Short description derived from the root entry's message supplier.
    pub fn headline(&self) -> String {
        let message = self.entries.lock().message(EntryId(0));
        message.map(|supplier| supplier.get().text).unwrap_or_default()
    }

    pub fn set_transaction_type(&self, transaction_type: &str) {
        if self.is_completed() || transaction_type.is_empty() {
            return;
        }
        self.state.lock().transaction_type = transaction_type.to_string();
    }

    pub fn set_transaction_name(&self, transaction_name: &str) {
        if self.is_completed() || transaction_name.is_empty() {
            return;
        }
        self.state.lock().transaction_name = transaction_name.to_string();
    }

    pub fn set_user(&self, user: &str) {
        if self.is_completed() || user.is_empty() {
            return;
        }
        self.state.lock().user = Some(user.to_string());
    }

    pub fn set_error(&self, error: &str) {
        if self.is_completed() || error.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        // first error wins; later errors would mask the root cause
        if state.error.is_none() {
            state.error = Some(error.to_string());
        }
    }

    pub fn put_custom_attribute(&self, name: &str, value: &str) {
        if self.is_completed() {
            return;
        }
        self.state
            .lock()
            .custom_attributes
            .entry(name.to_string())
            .or_default()
            .insert(value.to_string());
    }

    pub fn put_custom_detail(&self, name: &str, value: serde_json::Value) {
        if self.is_completed() {
            return;
        }
        self.state.lock().custom_detail.insert(name.to_string(), value);
    }

    pub fn custom_attributes(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.state.lock().custom_attributes.clone()
    }

    pub fn custom_detail(&self) -> serde_json::Map<String, serde_json::Value> {
        self.state.lock().custom_detail.clone()
    }

    pub fn set_store_threshold_millis_override(&self, millis: u32) {
        if self.is_completed() {
            return;
        }
        self.state.lock().store_threshold_millis_override = Some(millis);
    }

    pub fn store_threshold_millis_override(&self) -> Option<u32> {
        self.state.lock().store_threshold_millis_override
    }

    pub fn mark_for_storage(&self) {
        self.marked_for_storage.store(true, Ordering::SeqCst);
    }

    pub fn is_marked_for_storage(&self) -> bool {
        self.marked_for_storage.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Entry tree
    // ------------------------------------------------------------------

    pub fn root_entry_id(&self) -> EntryId {
        self.entries.lock().root()
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::SeqCst)
    }

    /// Count a suppressed entry (one replaced by a dummy handle).
    pub fn increment_entry_count(&self) {
        self.entry_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Push an open entry; the caller has already started its timer.
    pub fn push_entry(
        &self,
        start_tick: u64,
        message: Arc<dyn MessageSupplier>,
        timer: TimerId,
    ) -> EntryId {
        self.entry_count.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().push(start_tick, message, timer)
    }

    /// Pop an open entry and stop its timer. Returns true when the popped
    /// entry was the root, i.e. the transaction just completed.
    pub fn pop_entry(&self, entry: EntryId, end_tick: u64, error: Option<ErrorMessage>) -> bool {
        let outcome = self.entries.lock().pop(entry, end_tick, error);
        {
            let mut timers = self.timers.lock();
            for timer in &outcome.forced_timers {
                timers.stop(*timer, end_tick);
            }
            // root timer is stopped by complete(), not here
            if !outcome.was_root {
                if let Some(timer) = outcome.timer {
                    timers.stop(timer, end_tick);
                }
            }
        }
        if outcome.was_root {
            self.complete(end_tick);
        }
        outcome.was_root
    }

    /// Append a closed entry that bypasses the stack.
    pub fn add_entry(
        &self,
        start_tick: u64,
        end_tick: u64,
        message: Option<Arc<dyn MessageSupplier>>,
        error: Option<ErrorMessage>,
    ) -> EntryId {
        self.entry_count.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().add_flat(start_tick, end_tick, message, error)
    }

    /// Add the single limit-exceeded marker entry; idempotent.
    pub fn add_entry_limit_exceeded_marker_if_needed(&self, tick: u64) {
        self.entries.lock().add_limit_exceeded_marker(tick);
    }

    pub fn set_entry_stack_trace(&self, entry: EntryId, stack_trace: CapturedStackTrace) {
        self.entries.lock().set_stack_trace(entry, stack_trace);
    }

    pub fn entry_start_tick(&self, entry: EntryId) -> u64 {
        self.entries.lock().start_tick(entry)
    }

    pub fn entry_message(&self, entry: EntryId) -> Option<Arc<dyn MessageSupplier>> {
        self.entries.lock().message(entry)
    }

    /// Depth of the open-entry stack; zero once the root is popped.
    pub fn open_entry_depth(&self) -> usize {
        self.entries.lock().depth()
    }

    /// Entries materialized in the tree (markers included, suppressed
    /// entries excluded).
    pub fn stored_entry_count(&self) -> usize {
        self.entries.lock().stored_count()
    }

    pub fn entries_snapshot(&self) -> EntrySnapshot {
        self.entries.lock().snapshot()
    }

    // ------------------------------------------------------------------
    // Timer tree
    // ------------------------------------------------------------------

    /// Start a timer nested under the innermost live timer.
    pub fn start_nested_timer(&self, name: &TimerName, start_tick: u64) -> TimerId {
        self.timers.lock().start_nested(name, start_tick)
    }

    pub fn stop_timer(&self, timer: TimerId, end_tick: u64) {
        self.timers.lock().stop(timer, end_tick);
    }

    pub fn root_timer_total_nanos(&self) -> u64 {
        let timers = self.timers.lock();
        timers.total_nanos(timers.root())
    }

    /// Timer tree view; pass a capture tick to extend running slices for an
    /// in-flight snapshot.
    pub fn timers_snapshot(&self, capture_tick: Option<u64>) -> TimerSnapshot {
        self.timers.lock().snapshot(capture_tick)
    }

    // ------------------------------------------------------------------
    // Probes and profile
    // ------------------------------------------------------------------

    pub fn thread_info_data(&self) -> Option<ThreadInfoData> {
        self.thread_info.as_ref().and_then(ThreadInfoComponent::data)
    }

    pub fn gc_activity(&self) -> Option<Vec<GcActivity>> {
        self.gc_info.as_ref().and_then(GcInfoComponent::data)
    }

    /// Fold one sampled stack into the transaction's profile.
    pub fn add_profile_sample<S: AsRef<str>>(&self, stack: &[S]) {
        self.profile
            .lock()
            .get_or_insert_with(Profile::new)
            .add_sample(stack);
    }

    pub fn profile_sample_count(&self) -> u64 {
        self.profile
            .lock()
            .as_ref()
            .map(Profile::sample_count)
            .unwrap_or(0)
    }

    pub fn has_profile(&self) -> bool {
        self.profile.lock().is_some()
    }

    pub fn profile_snapshot(&self) -> Option<ProfileSnapshot> {
        self.profile.lock().as_ref().map(Profile::snapshot)
    }

    pub fn profile(&self) -> Option<Profile> {
        self.profile.lock().clone()
    }

    // ------------------------------------------------------------------
    // Scheduled tasks
    // ------------------------------------------------------------------

    pub fn has_user_profile_task(&self) -> bool {
        self.user_profile_task.lock().is_some()
    }

    pub fn set_user_profile_task(&self, task: Box<dyn ScheduledTask>) {
        *self.user_profile_task.lock() = Some(task);
    }

    pub fn set_immediate_store_task(&self, task: Box<dyn ScheduledTask>) {
        *self.immediate_store_task.lock() = Some(task);
    }

    /// Cancel both scheduled tasks; part of the completion cascade.
    /// Cancellation is advisory, so the handles stay in place.
    pub fn cancel_scheduled_tasks(&self) {
        if let Some(task) = self.immediate_store_task.lock().as_ref() {
            task.cancel();
        }
        if let Some(task) = self.user_profile_task.lock().as_ref() {
            task.cancel();
        }
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    fn complete(&self, end_tick: u64) {
        self.timers.lock().stop_root(end_tick);
        if let Some(thread_info) = &self.thread_info {
            thread_info.complete();
        }
        if let Some(gc_info) = &self.gc_info {
            gc_info.complete();
        }
        self.end_tick.store(end_tick, Ordering::SeqCst);
        self.capture_time_millis
            .store(self.clock.current_time_millis(), Ordering::SeqCst);
        self.completed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::constant_message;
    use crate::time::SystemClock;

    fn transaction() -> Transaction {
        Transaction::new(
            "Web",
            "GET /",
            constant_message("GET /users"),
            TimerName::new("http request"),
            1_700_000_000_000,
            1_000,
            Arc::new(SystemClock::new()),
            None,
            None,
        )
    }

    #[test]
    fn test_new_transaction_has_root_entry_and_running_timer() {
        let txn = transaction();
        assert_eq!(txn.entry_count(), 1);
        assert_eq!(txn.open_entry_depth(), 1);
        assert!(!txn.is_completed());
        assert_eq!(txn.headline(), "GET /users");
    }

    #[test]
    fn test_pop_root_completes() {
        let txn = transaction();
        let completed = txn.pop_entry(EntryId(0), 6_000, None);
        assert!(completed);
        assert!(txn.is_completed());
        assert_eq!(txn.duration_nanos(), 5_000);
        assert_eq!(txn.root_timer_total_nanos(), 5_000);
        assert!(txn.capture_time_millis().is_some());
    }

    #[test]
    fn test_setters_ignored_after_completion() {
        let txn = transaction();
        txn.pop_entry(EntryId(0), 2_000, None);
        txn.set_transaction_name("changed");
        txn.set_user("alice");
        txn.put_custom_attribute("k", "v");
        assert_eq!(txn.transaction_name(), "GET /");
        assert_eq!(txn.user(), None);
        assert!(txn.custom_attributes().is_empty());
    }

    #[test]
    fn test_first_error_wins() {
        let txn = transaction();
        txn.set_error("first failure");
        txn.set_error("second failure");
        assert_eq!(txn.error(), Some("first failure".to_string()));
    }

    #[test]
    fn test_custom_attributes_are_multivalued() {
        let txn = transaction();
        txn.put_custom_attribute("role", "admin");
        txn.put_custom_attribute("role", "user");
        txn.put_custom_attribute("role", "admin");
        let attributes = txn.custom_attributes();
        assert_eq!(attributes["role"].len(), 2);
    }

    #[test]
    fn test_nested_entry_timing() {
        let txn = transaction();
        let timer = txn.start_nested_timer(&TimerName::new("db query"), 2_000);
        let entry = txn.push_entry(2_000, constant_message("SELECT 1"), timer);
        assert_eq!(txn.entry_count(), 2);
        let completed = txn.pop_entry(entry, 3_000, None);
        assert!(!completed);
        txn.pop_entry(EntryId(0), 4_000, None);
        let timers = txn.timers_snapshot(None);
        assert_eq!(timers.nested_timers.len(), 1);
        assert_eq!(timers.nested_timers[0].total_nanos, 1_000);
    }

    #[test]
    fn test_profile_samples() {
        let txn = transaction();
        txn.add_profile_sample(&["main", "handler"]);
        txn.add_profile_sample(&["main", "handler", "query"]);
        assert_eq!(txn.profile_sample_count(), 2);
        assert!(txn.has_profile());
    }

    #[test]
    fn test_id_string_form_is_stable() {
        let txn = transaction();
        let first = txn.id().to_string();
        let second = txn.id().to_string();
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
    }
}
