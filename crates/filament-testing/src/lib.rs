//! Test support for the Filament workspace
//!
//! Mock ports, deterministic time sources, a fully-wired engine harness and
//! shared proptest configuration. Depended on as a dev-dependency by the
//! other crates' integration tests.

pub mod fixtures;
pub mod mocks;
pub mod proptest_config;

pub use fixtures::{
    completed_transaction, test_harness, test_harness_with, test_harness_with_max_entries,
    test_harness_with_plugin, TestHarness,
};
pub use mocks::{
    FakeClock, FakeTicker, FixedGcStatsProbe, FixedThreadStatsProbe, MockCollector,
    MockScheduledTask, MockUserProfileScheduler,
};
