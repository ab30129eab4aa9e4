//! Shared proptest configuration for consistent test behavior across crates.
//!
//! # Usage
//!
//! ```rust,ignore
//! use filament_testing::proptest_config;
//!
//! proptest! {
//!     #![proptest_config(proptest_config::auto_config())]
//!
//!     #[test]
//!     fn my_property(x in 0..100i32) {
//!         // ...
//!     }
//! }
//! ```
//!
//! Set `PROPTEST_CASES` to control thoroughness in CI.

use proptest::prelude::*;

/// Get config based on PROPTEST_CASES env var. Defaults to 256 cases.
pub fn auto_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(256);

    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

/// Standard config for most property tests.
pub fn standard_config() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    }
}
