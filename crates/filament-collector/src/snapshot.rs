//! Trace snapshots
//!
//! Immutable captures of a transaction - active, partial or completed -
//! normalized to a capture tick. Timings of a still-running transaction are
//! presented as of that tick without blocking the instrumented thread; the
//! readers take the same short locks the owning thread takes and accept a
//! slightly stale picture.

use filament_core::{Result, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Whether detail data exists for a snapshot. `Expired` is reserved for
/// storage-side retention; the builders here never emit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Existence {
    Yes,
    No,
    Expired,
}

/// Immutable snapshot of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSnapshot {
    pub id: String,
    pub active: bool,
    /// Stored as an intermediate record for a long-running transaction.
    pub partial: bool,
    pub start_time_millis: i64,
    pub capture_time_millis: i64,
    pub duration_nanos: u64,
    pub transaction_type: String,
    pub transaction_name: String,
    pub headline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// JSON object of name to value list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_attributes: Option<String>,
    /// Typed copy of the attributes for index writers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_attributes_for_indexing: BTreeMap<String, BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_detail: Option<String>,
    /// Serialized timer tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timers: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_cpu_nanos: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_blocked_nanos: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_waited_nanos: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_allocated_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_activity: Option<String>,
    pub entry_count: u64,
    pub profile_sample_count: u64,
    pub entries_existence: Existence,
    pub profile_existence: Existence,
}

/// Snapshot of a transaction that is still running, normalized to the given
/// capture tick.
pub fn create_active_snapshot(
    transaction: &Transaction,
    capture_time_millis: i64,
    capture_tick: u64,
) -> Result<TraceSnapshot> {
    create_snapshot(transaction, true, false, capture_time_millis, capture_tick)
}

/// Intermediate stored record for a long-running transaction.
pub fn create_partial_snapshot(
    transaction: &Transaction,
    capture_time_millis: i64,
    capture_tick: u64,
) -> Result<TraceSnapshot> {
    create_snapshot(transaction, true, true, capture_time_millis, capture_tick)
}

/// Snapshot of a completed transaction, at its own end tick and capture
/// time.
pub fn create_completed_snapshot(transaction: &Transaction) -> Result<TraceSnapshot> {
    let capture_time = transaction
        .capture_time_millis()
        .unwrap_or_else(|| transaction.start_time_millis());
    let capture_tick = transaction.end_tick().unwrap_or_else(|| transaction.start_tick());
    create_snapshot(transaction, false, false, capture_time, capture_tick)
}

// timings for still-active transactions are normalized to the capture tick
// without blocking updates; the result is a best-effort picture at that tick
fn create_snapshot(
    transaction: &Transaction,
    active: bool,
    partial: bool,
    capture_time_millis: i64,
    capture_tick: u64,
) -> Result<TraceSnapshot> {
    let custom_attributes = transaction.custom_attributes();
    let custom_detail = transaction.custom_detail();
    let timers = transaction.timers_snapshot(if active { Some(capture_tick) } else { None });
    let thread_info = transaction.thread_info_data();
    let profile_existence = if transaction.has_profile() {
        Existence::Yes
    } else {
        Existence::No
    };
    Ok(TraceSnapshot {
        id: transaction.id().to_string(),
        active,
        partial,
        start_time_millis: transaction.start_time_millis(),
        capture_time_millis,
        duration_nanos: capture_tick.saturating_sub(transaction.start_tick()),
        transaction_type: transaction.transaction_type(),
        transaction_name: transaction.transaction_name(),
        headline: transaction.headline(),
        error: transaction.error(),
        user: transaction.user(),
        custom_attributes: if custom_attributes.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&custom_attributes)?)
        },
        custom_attributes_for_indexing: custom_attributes,
        custom_detail: if custom_detail.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&custom_detail)?)
        },
        timers: Some(serde_json::to_string(&timers)?),
        thread_cpu_nanos: thread_info.and_then(|info| info.cpu_nanos),
        thread_blocked_nanos: thread_info.and_then(|info| info.blocked_nanos),
        thread_waited_nanos: thread_info.and_then(|info| info.waited_nanos),
        thread_allocated_bytes: thread_info.and_then(|info| info.allocated_bytes),
        gc_activity: match transaction.gc_activity() {
            Some(activity) if !activity.is_empty() => Some(serde_json::to_string(&activity)?),
            _ => None,
        },
        entry_count: transaction.entry_count(),
        profile_sample_count: transaction.profile_sample_count(),
        entries_existence: Existence::Yes,
        profile_existence,
    })
}
