//! Aggregate fold scenarios: per-bucket accumulation, interval collection,
//! bucket merging and histogram round-trips over real transactions.

use filament_collector::{AggregateBuilder, AggregateIntervalCollector, LazyHistogram};
use filament_testing::completed_transaction;
use proptest::prelude::*;

#[test]
fn fold_three_transactions_into_one_bucket() {
    let transactions = [
        completed_transaction("Web", "GET /", 100, None),
        completed_transaction("Web", "GET /", 200, Some("upstream timeout")),
        completed_transaction("Web", "GET /", 500, None),
    ];
    transactions[0].mark_for_storage();
    transactions[2].mark_for_storage();

    let mut builder = AggregateBuilder::new("Web", Some("GET /".to_string()));
    for txn in &transactions {
        builder.add(txn);
        builder.add_to_timers(&txn.timers_snapshot(None));
    }
    let aggregate = builder.build(1_700_000_060_000).unwrap();

    assert_eq!(aggregate.transaction_count, 3);
    assert_eq!(aggregate.total_micros, 800);
    assert_eq!(aggregate.error_count, 1);
    assert_eq!(aggregate.trace_count, 2);

    let histogram = LazyHistogram::decode(&aggregate.histogram).unwrap();
    assert_eq!(histogram.len(), 3);
    assert_eq!(histogram.value_at_quantile(1.0), 500);
    assert_eq!(histogram.value_at_quantile(0.5), 200);

    // merged timer tree: synthetic root, then the three real roots by name
    let timers: serde_json::Value = serde_json::from_str(&aggregate.timers).unwrap();
    assert_eq!(timers["name"], "");
    assert_eq!(timers["count"], 3);
    assert_eq!(timers["total_micros"], 800);
    let nested = &timers["nested_timers"][0];
    assert_eq!(nested["name"], "http request");
    assert_eq!(nested["count"], 3);
}

#[test]
fn merging_with_empty_bucket_is_identity() {
    let transactions = [
        completed_transaction("Web", "GET /", 100, None),
        completed_transaction("Web", "GET /", 200, Some("boom")),
        completed_transaction("Web", "GET /", 500, None),
    ];
    let mut builder = AggregateBuilder::new("Web", Some("GET /".to_string()));
    for txn in &transactions {
        builder.add(txn);
        builder.add_to_timers(&txn.timers_snapshot(None));
    }
    let original = builder.build(1_700_000_060_000).unwrap();

    builder.merge(&AggregateBuilder::new("Web", Some("GET /".to_string())));
    let merged = builder.build(1_700_000_060_000).unwrap();
    assert_eq!(merged, original);
}

#[test]
fn merging_two_buckets_accumulates() {
    let mut left = AggregateBuilder::new("Web", None);
    left.add(&completed_transaction("Web", "GET /", 100, None));
    let mut right = AggregateBuilder::new("Web", None);
    right.add(&completed_transaction("Web", "GET /", 300, Some("boom")));

    left.merge(&right);
    let aggregate = left.build(0).unwrap();
    assert_eq!(aggregate.transaction_count, 2);
    assert_eq!(aggregate.total_micros, 400);
    assert_eq!(aggregate.error_count, 1);
    let histogram = LazyHistogram::decode(&aggregate.histogram).unwrap();
    assert_eq!(histogram.len(), 2);
}

#[test]
fn interval_collector_buckets_by_type_and_name() {
    let mut collector = AggregateIntervalCollector::new();
    collector.add(&completed_transaction("Web", "GET /", 100, None));
    collector.add(&completed_transaction("Web", "GET /users", 200, None));
    collector.add(&completed_transaction("Background", "cleanup", 50, None));
    assert!(!collector.is_empty());

    let summaries = collector.transaction_summaries();
    assert_eq!(summaries.len(), 3);

    let aggregates = collector.flush(1_700_000_060_000).unwrap();
    assert!(collector.is_empty());
    // one overall bucket per type plus one per (type, name)
    assert_eq!(aggregates.len(), 5);

    let web_overall = aggregates
        .iter()
        .find(|aggregate| aggregate.transaction_type == "Web" && aggregate.transaction_name.is_none())
        .unwrap();
    assert_eq!(web_overall.transaction_count, 2);
    assert_eq!(web_overall.total_micros, 300);

    let get_users = aggregates
        .iter()
        .find(|aggregate| aggregate.transaction_name.as_deref() == Some("GET /users"))
        .unwrap();
    assert_eq!(get_users.transaction_count, 1);
}

#[test]
fn aggregate_serde_roundtrip() {
    let mut builder = AggregateBuilder::new("Web", Some("GET /".to_string()));
    builder.add(&completed_transaction("Web", "GET /", 250, None));
    let aggregate = builder.build(1_700_000_060_000).unwrap();
    let json = serde_json::to_string(&aggregate).unwrap();
    let back: filament_collector::Aggregate = serde_json::from_str(&json).unwrap();
    assert_eq!(back, aggregate);
}

proptest! {
    #![proptest_config(filament_testing::proptest_config::auto_config())]

    #[test]
    fn histogram_roundtrip_preserves_count_and_quantiles(
        values in prop::collection::vec(0u64..10_000_000_000_000, 0..300)
    ) {
        let mut histogram = LazyHistogram::new();
        for value in &values {
            histogram.add(*value);
        }
        let decoded = LazyHistogram::decode(&histogram.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded.len(), values.len() as u64);
        for quantile in [0.0, 0.5, 0.9, 1.0] {
            prop_assert_eq!(
                decoded.value_at_quantile(quantile),
                histogram.value_at_quantile(quantile)
            );
        }
    }
}
