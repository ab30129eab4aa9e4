//! Aggregates
//!
//! Folds completed transactions into per-(type, name) summaries over one
//! time interval: counters, a latency histogram and a timer tree merged by
//! name. Aggregation uses microseconds to avoid nanosecond rollover over
//! long totals.

use crate::histogram::LazyHistogram;
use filament_core::{Profile, Result, TimerSnapshot, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable per-bucket rollup emitted at interval close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub transaction_type: String,
    /// `None` for the per-type overall bucket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_name: Option<String>,
    pub capture_time_millis: i64,
    pub total_micros: u64,
    pub error_count: u64,
    pub transaction_count: u64,
    /// Transactions that will also be stored as full traces.
    pub trace_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cpu_micros: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_blocked_micros: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_waited_micros: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_allocated_bytes: Option<u64>,
    pub profile_sample_count: u64,
    /// Serialized merged timer tree rooted at a synthetic node.
    pub timers: String,
    /// Compact-encoded latency histogram (microseconds).
    pub histogram: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// Live per-name summary for in-interval display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_name: Option<String>,
    pub total_micros: u64,
    pub transaction_count: u64,
}

/// Live per-name error summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_name: Option<String>,
    pub error_count: u64,
    pub transaction_count: u64,
}

/// Error-rate time-series point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorPoint {
    pub capture_time_millis: i64,
    pub error_count: u64,
    pub transaction_count: u64,
}

/// One node of the merged aggregate timer tree.
#[derive(Debug, Clone, Default, PartialEq)]
struct AggregateTimer {
    total_micros: u64,
    count: u64,
    nested: BTreeMap<String, AggregateTimer>,
}

/// Serialized form of an aggregate timer node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateTimerSnapshot {
    pub name: String,
    pub total_micros: u64,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested_timers: Vec<AggregateTimerSnapshot>,
}

impl AggregateTimer {
    fn merge_child(&mut self, timer: &TimerSnapshot) {
        let child = self.nested.entry(timer.name.clone()).or_default();
        child.total_micros += nanos_to_micros(timer.total_nanos);
        child.count += timer.count;
        for nested in &timer.nested_timers {
            child.merge_child(nested);
        }
    }

    fn merge(&mut self, other: &AggregateTimer) {
        self.total_micros += other.total_micros;
        self.count += other.count;
        for (name, child) in &other.nested {
            self.nested.entry(name.clone()).or_default().merge(child);
        }
    }

    fn snapshot(&self, name: &str) -> AggregateTimerSnapshot {
        AggregateTimerSnapshot {
            name: name.to_string(),
            total_micros: self.total_micros,
            count: self.count,
            nested_timers: self
                .nested
                .iter()
                .map(|(child_name, child)| child.snapshot(child_name))
                .collect(),
        }
    }
}

/// Incrementally folds transactions into one (type, name) bucket.
///
/// Not synchronized; the interval collector owns it under its own lock.
#[derive(Debug, Clone)]
pub struct AggregateBuilder {
    transaction_type: String,
    transaction_name: Option<String>,
    total_micros: u64,
    error_count: u64,
    transaction_count: u64,
    trace_count: u64,
    total_cpu_micros: Option<u64>,
    total_blocked_micros: Option<u64>,
    total_waited_micros: Option<u64>,
    total_allocated_bytes: Option<u64>,
    profile_sample_count: u64,
    histogram: LazyHistogram,
    /// The real root timers of folded transactions merge into this node.
    synthetic_root_timer: AggregateTimer,
    profile: Profile,
}

impl AggregateBuilder {
    pub fn new(transaction_type: impl Into<String>, transaction_name: Option<String>) -> Self {
        AggregateBuilder {
            transaction_type: transaction_type.into(),
            transaction_name,
            total_micros: 0,
            error_count: 0,
            transaction_count: 0,
            trace_count: 0,
            total_cpu_micros: None,
            total_blocked_micros: None,
            total_waited_micros: None,
            total_allocated_bytes: None,
            profile_sample_count: 0,
            histogram: LazyHistogram::new(),
            synthetic_root_timer: AggregateTimer::default(),
            profile: Profile::new(),
        }
    }

    /// Fold one completed transaction's counters and duration.
    pub fn add(&mut self, transaction: &Transaction) {
        let duration_micros = nanos_to_micros(transaction.duration_nanos());
        self.total_micros += duration_micros;
        if transaction.error().is_some() {
            self.error_count += 1;
        }
        if transaction.is_marked_for_storage() {
            self.trace_count += 1;
        }
        self.transaction_count += 1;
        if let Some(thread_info) = transaction.thread_info_data() {
            self.total_cpu_micros = null_aware_add(
                self.total_cpu_micros,
                thread_info.cpu_nanos.map(nanos_to_micros),
            );
            self.total_blocked_micros = null_aware_add(
                self.total_blocked_micros,
                thread_info.blocked_nanos.map(nanos_to_micros),
            );
            self.total_waited_micros = null_aware_add(
                self.total_waited_micros,
                thread_info.waited_nanos.map(nanos_to_micros),
            );
            self.total_allocated_bytes =
                null_aware_add(self.total_allocated_bytes, thread_info.allocated_bytes);
        }
        self.histogram.add(duration_micros);
    }

    /// Fold one transaction's timer tree, merging by name into the synthetic
    /// root. Different transactions may nest differently; the builder simply
    /// accumulates.
    pub fn add_to_timers(&mut self, root_timer: &TimerSnapshot) {
        self.synthetic_root_timer.total_micros += nanos_to_micros(root_timer.total_nanos);
        self.synthetic_root_timer.count += root_timer.count;
        self.synthetic_root_timer.merge_child(root_timer);
    }

    /// Fold one transaction's stack-sampling profile.
    pub fn add_to_profile(&mut self, profile: &Profile) {
        self.profile.merge(profile);
        self.profile_sample_count += profile.sample_count();
    }

    /// Merge another bucket into this one (interval consolidation).
    pub fn merge(&mut self, other: &AggregateBuilder) {
        self.total_micros += other.total_micros;
        self.error_count += other.error_count;
        self.transaction_count += other.transaction_count;
        self.trace_count += other.trace_count;
        self.total_cpu_micros = null_aware_add(self.total_cpu_micros, other.total_cpu_micros);
        self.total_blocked_micros =
            null_aware_add(self.total_blocked_micros, other.total_blocked_micros);
        self.total_waited_micros =
            null_aware_add(self.total_waited_micros, other.total_waited_micros);
        self.total_allocated_bytes =
            null_aware_add(self.total_allocated_bytes, other.total_allocated_bytes);
        self.profile_sample_count += other.profile_sample_count;
        self.histogram.merge(&other.histogram);
        self.synthetic_root_timer.merge(&other.synthetic_root_timer);
        self.profile.merge(&other.profile);
    }

    /// Emit the immutable aggregate record for this bucket.
    pub fn build(&self, capture_time_millis: i64) -> Result<Aggregate> {
        Ok(Aggregate {
            transaction_type: self.transaction_type.clone(),
            transaction_name: self.transaction_name.clone(),
            capture_time_millis,
            total_micros: self.total_micros,
            error_count: self.error_count,
            transaction_count: self.transaction_count,
            trace_count: self.trace_count,
            total_cpu_micros: self.total_cpu_micros,
            total_blocked_micros: self.total_blocked_micros,
            total_waited_micros: self.total_waited_micros,
            total_allocated_bytes: self.total_allocated_bytes,
            profile_sample_count: self.profile_sample_count,
            timers: serde_json::to_string(&self.synthetic_root_timer.snapshot(""))?,
            histogram: self.histogram.encode()?,
            profile: if self.profile_sample_count > 0 {
                Some(serde_json::to_string(&self.profile.snapshot())?)
            } else {
                None
            },
        })
    }

    pub fn transaction_summary(&self) -> TransactionSummary {
        TransactionSummary {
            transaction_name: self.transaction_name.clone(),
            total_micros: self.total_micros,
            transaction_count: self.transaction_count,
        }
    }

    pub fn error_summary(&self) -> ErrorSummary {
        ErrorSummary {
            transaction_name: self.transaction_name.clone(),
            error_count: self.error_count,
            transaction_count: self.transaction_count,
        }
    }

    pub fn error_point(&self, capture_time_millis: i64) -> ErrorPoint {
        ErrorPoint {
            capture_time_millis,
            error_count: self.error_count,
            transaction_count: self.transaction_count,
        }
    }

    pub fn transaction_count(&self) -> u64 {
        self.transaction_count
    }

    pub fn profile_sample_count(&self) -> u64 {
        self.profile_sample_count
    }
}

/// Per-interval map of aggregate buckets: one overall bucket per
/// transaction type plus one per (type, name).
#[derive(Debug, Default)]
pub struct AggregateIntervalCollector {
    by_type: BTreeMap<String, TypeAggregates>,
}

#[derive(Debug)]
struct TypeAggregates {
    overall: AggregateBuilder,
    by_name: BTreeMap<String, AggregateBuilder>,
}

impl AggregateIntervalCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one completed transaction into its overall and per-name buckets.
    pub fn add(&mut self, transaction: &Transaction) {
        let transaction_type = transaction.transaction_type();
        let transaction_name = transaction.transaction_name();
        let timers = transaction.timers_snapshot(None);
        let profile = transaction.profile();
        let type_aggregates = self
            .by_type
            .entry(transaction_type.clone())
            .or_insert_with(|| TypeAggregates {
                overall: AggregateBuilder::new(transaction_type.clone(), None),
                by_name: BTreeMap::new(),
            });
        let name_builder = type_aggregates
            .by_name
            .entry(transaction_name.clone())
            .or_insert_with(|| {
                AggregateBuilder::new(transaction_type.clone(), Some(transaction_name.clone()))
            });
        for builder in [&mut type_aggregates.overall, name_builder] {
            builder.add(transaction);
            builder.add_to_timers(&timers);
            if let Some(profile) = &profile {
                builder.add_to_profile(profile);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Live summaries of all per-name buckets, for in-interval display.
    pub fn transaction_summaries(&self) -> Vec<TransactionSummary> {
        self.by_type
            .values()
            .flat_map(|aggregates| aggregates.by_name.values())
            .map(AggregateBuilder::transaction_summary)
            .collect()
    }

    /// Emit aggregates for every bucket and reset for the next interval.
    pub fn flush(&mut self, capture_time_millis: i64) -> Result<Vec<Aggregate>> {
        let mut aggregates = Vec::new();
        for type_aggregates in self.by_type.values() {
            aggregates.push(type_aggregates.overall.build(capture_time_millis)?);
            for builder in type_aggregates.by_name.values() {
                aggregates.push(builder.build(capture_time_millis)?);
            }
        }
        self.by_type.clear();
        Ok(aggregates)
    }
}

fn nanos_to_micros(nanos: u64) -> u64 {
    nanos / 1_000
}

// matches the original's null-aware addition: an absent reading does not
// zero out the side that has one
fn null_aware_add(x: Option<u64>, y: Option<u64>) -> Option<u64> {
    match (x, y) {
        (None, y) => y,
        (x, None) => x,
        (Some(x), Some(y)) => Some(x + y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_aware_add() {
        assert_eq!(null_aware_add(None, None), None);
        assert_eq!(null_aware_add(Some(1), None), Some(1));
        assert_eq!(null_aware_add(None, Some(2)), Some(2));
        assert_eq!(null_aware_add(Some(1), Some(2)), Some(3));
    }

    #[test]
    fn test_add_to_timers_merges_by_name() {
        let mut builder = AggregateBuilder::new("Web", None);
        let root = TimerSnapshot {
            name: "http request".to_string(),
            extended: false,
            total_nanos: 10_000,
            count: 1,
            active: false,
            nested_timers: vec![TimerSnapshot {
                name: "jdbc query".to_string(),
                extended: false,
                total_nanos: 4_000,
                count: 2,
                active: false,
                nested_timers: Vec::new(),
            }],
        };
        builder.add_to_timers(&root);
        builder.add_to_timers(&root);
        let snapshot = builder.synthetic_root_timer.snapshot("");
        assert_eq!(snapshot.total_micros, 20);
        assert_eq!(snapshot.count, 2);
        let http = &snapshot.nested_timers[0];
        assert_eq!(http.name, "http request");
        assert_eq!(http.count, 2);
        let jdbc = &http.nested_timers[0];
        assert_eq!(jdbc.name, "jdbc query");
        assert_eq!(jdbc.total_micros, 8);
        assert_eq!(jdbc.count, 4);
    }

    #[test]
    fn test_build_without_profile_omits_it() {
        let builder = AggregateBuilder::new("Web", Some("GET /".to_string()));
        let aggregate = builder.build(1_700_000_060_000).unwrap();
        assert_eq!(aggregate.profile, None);
        assert_eq!(aggregate.transaction_count, 0);
        assert!(aggregate.timers.contains("\"name\":\"\""));
    }

    #[test]
    fn test_profile_fold() {
        let mut builder = AggregateBuilder::new("Web", None);
        let mut profile = Profile::new();
        profile.add_sample(&["main", "handler"]);
        builder.add_to_profile(&profile);
        builder.add_to_profile(&profile);
        assert_eq!(builder.profile_sample_count(), 2);
        let aggregate = builder.build(0).unwrap();
        assert!(aggregate.profile.unwrap().contains("handler"));
    }
}
