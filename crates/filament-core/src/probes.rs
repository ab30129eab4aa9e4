//! Thread and GC probes
//!
//! Both probes are optional collaborators: when the host runtime cannot
//! supply a reading the corresponding snapshot fields are silently omitted.
//! Components capture a baseline at transaction start and finalize deltas at
//! completion.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Point-in-time per-thread counters. Any field may be unsupported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadStats {
    pub cpu_nanos: Option<u64>,
    pub blocked_nanos: Option<u64>,
    pub waited_nanos: Option<u64>,
    pub allocated_bytes: Option<u64>,
}

/// Reads counters for the calling thread.
pub trait ThreadStatsProbe: Send + Sync {
    fn read(&self) -> ThreadStats;
}

/// Finalized per-transaction thread info (deltas over the transaction).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfoData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_nanos: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_nanos: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waited_nanos: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocated_bytes: Option<u64>,
}

/// Captures thread counters at transaction start, deltas at completion.
pub struct ThreadInfoComponent {
    probe: Arc<dyn ThreadStatsProbe>,
    start: ThreadStats,
    completed: Mutex<Option<ThreadInfoData>>,
}

impl std::fmt::Debug for ThreadInfoComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadInfoComponent")
            .field("start", &self.start)
            .finish()
    }
}

impl ThreadInfoComponent {
    pub fn start(probe: Arc<dyn ThreadStatsProbe>) -> Self {
        let start = probe.read();
        Self {
            probe,
            start,
            completed: Mutex::new(None),
        }
    }

    /// Finalize deltas; must run on the transaction's owning thread.
    pub fn complete(&self) {
        let end = self.probe.read();
        *self.completed.lock() = Some(ThreadInfoData {
            cpu_nanos: delta(self.start.cpu_nanos, end.cpu_nanos),
            blocked_nanos: delta(self.start.blocked_nanos, end.blocked_nanos),
            waited_nanos: delta(self.start.waited_nanos, end.waited_nanos),
            allocated_bytes: delta(self.start.allocated_bytes, end.allocated_bytes),
        });
    }

    /// Finalized data, or `None` while the transaction is still running.
    pub fn data(&self) -> Option<ThreadInfoData> {
        *self.completed.lock()
    }
}

fn delta(start: Option<u64>, end: Option<u64>) -> Option<u64> {
    match (start, end) {
        (Some(start), Some(end)) => Some(end.saturating_sub(start)),
        _ => None,
    }
}

/// One garbage collector's cumulative counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcActivity {
    pub name: String,
    pub collection_count: u64,
    pub collection_time_millis: u64,
}

/// Reads cumulative GC counters for the host runtime.
pub trait GcStatsProbe: Send + Sync {
    fn read(&self) -> Vec<GcActivity>;
}

/// Captures GC counters at transaction start, per-collector deltas at
/// completion. Collectors with no activity during the transaction are
/// dropped from the result.
pub struct GcInfoComponent {
    probe: Arc<dyn GcStatsProbe>,
    start: Vec<GcActivity>,
    completed: Mutex<Option<Vec<GcActivity>>>,
}

impl std::fmt::Debug for GcInfoComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcInfoComponent")
            .field("start", &self.start)
            .finish()
    }
}

impl GcInfoComponent {
    pub fn start(probe: Arc<dyn GcStatsProbe>) -> Self {
        let start = probe.read();
        Self {
            probe,
            start,
            completed: Mutex::new(None),
        }
    }

    pub fn complete(&self) {
        let end = self.probe.read();
        let deltas = end
            .into_iter()
            .filter_map(|current| {
                let baseline = self
                    .start
                    .iter()
                    .find(|activity| activity.name == current.name);
                let (count_base, time_base) = baseline
                    .map(|activity| (activity.collection_count, activity.collection_time_millis))
                    .unwrap_or((0, 0));
                let count = current.collection_count.saturating_sub(count_base);
                if count == 0 {
                    return None;
                }
                Some(GcActivity {
                    name: current.name,
                    collection_count: count,
                    collection_time_millis: current
                        .collection_time_millis
                        .saturating_sub(time_base),
                })
            })
            .collect();
        *self.completed.lock() = Some(deltas);
    }

    pub fn data(&self) -> Option<Vec<GcActivity>> {
        self.completed.lock().clone()
    }
}
