//! Snapshot scenarios over transactions driven through the real facade.

use filament_collector::{create_active_snapshot, create_completed_snapshot, Existence};
use filament_core::{
    constant_message, Clock, ThreadStats, Ticker, TimerName, Transaction,
};
use filament_testing::{test_harness, FakeClock, FixedThreadStatsProbe};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn active_snapshot_of_in_flight_transaction() {
    let harness = test_harness();
    let t1 = harness.services.get_timer_name("http request");
    let entry = harness.services.start_transaction(
        "Web",
        "GET /",
        constant_message("GET /users?limit=10"),
        &t1,
    );
    harness.ticker.advance(Duration::from_millis(3));

    // a snapshot thread captures the live transaction without ending it
    let live = harness.registry.all_transactions();
    assert_eq!(live.len(), 1);
    let capture_tick = harness.ticker.read_nanos();
    let snapshot =
        create_active_snapshot(&live[0], harness.clock.current_time_millis(), capture_tick)
            .unwrap();
    assert!(snapshot.active);
    assert!(!snapshot.partial);
    assert_eq!(snapshot.duration_nanos, 3_000_000);
    assert_eq!(snapshot.headline, "GET /users?limit=10");
    assert_eq!(snapshot.entry_count, 1);

    entry.end();
    assert!(harness.registry.is_empty());
}

#[test]
fn completed_snapshot_through_facade() {
    let harness = test_harness();
    let t1 = harness.services.get_timer_name("http request");
    let entry = harness.services.start_transaction(
        "Web",
        "GET /",
        constant_message("GET /"),
        &t1,
    );
    harness.services.set_transaction_user("alice");
    harness.ticker.advance(Duration::from_millis(7));
    harness.clock.advance_millis(7);
    entry.end();

    let txn = &harness.collector.completed()[0];
    let snapshot = create_completed_snapshot(txn).unwrap();
    assert!(!snapshot.active);
    assert_eq!(snapshot.duration_nanos, 7_000_000);
    assert_eq!(snapshot.capture_time_millis, 1_700_000_000_007);
    assert_eq!(snapshot.user, Some("alice".to_string()));
    assert_eq!(snapshot.entries_existence, Existence::Yes);
    // completed timers carry no active flags
    assert!(!snapshot.timers.unwrap().contains("\"active\":true"));
}

#[test]
fn completed_snapshot_includes_thread_info_deltas() {
    let probe = Arc::new(FixedThreadStatsProbe::new(vec![
        ThreadStats {
            cpu_nanos: Some(10_000),
            blocked_nanos: Some(0),
            waited_nanos: None,
            allocated_bytes: Some(1_024),
        },
        ThreadStats {
            cpu_nanos: Some(60_000),
            blocked_nanos: Some(5_000),
            waited_nanos: None,
            allocated_bytes: Some(9_216),
        },
    ]));
    let clock = Arc::new(FakeClock::new());
    clock.set_millis(1_700_000_000_000);
    let txn = Transaction::new(
        "Web",
        "GET /",
        constant_message("GET /"),
        TimerName::new("http request"),
        1_700_000_000_000,
        0,
        clock,
        Some(probe),
        None,
    );
    txn.pop_entry(txn.root_entry_id(), 4_000_000, None);

    let snapshot = create_completed_snapshot(&txn).unwrap();
    assert_eq!(snapshot.thread_cpu_nanos, Some(50_000));
    assert_eq!(snapshot.thread_blocked_nanos, Some(5_000));
    assert_eq!(snapshot.thread_waited_nanos, None);
    assert_eq!(snapshot.thread_allocated_bytes, Some(8_192));
}

#[test]
fn profile_existence_reflects_samples() {
    let harness = test_harness();
    let t1 = harness.services.get_timer_name("http request");
    let entry = harness.services.start_transaction(
        "Web",
        "GET /",
        constant_message("GET /"),
        &t1,
    );
    let txn = harness.registry.all_transactions().pop().unwrap();
    txn.add_profile_sample(&["main", "handler", "query"]);
    entry.end();

    let snapshot = create_completed_snapshot(&txn).unwrap();
    assert_eq!(snapshot.profile_existence, Existence::Yes);
    assert_eq!(snapshot.profile_sample_count, 1);
}
