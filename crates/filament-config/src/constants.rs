//! Default configuration values

/// Default cap on trace entries materialized per transaction.
pub const DEFAULT_MAX_TRACE_ENTRIES_PER_TRANSACTION: usize = 2000;

/// Thread counter capture on by default; the probe is cheap.
pub const DEFAULT_CAPTURE_THREAD_INFO: bool = true;

/// GC counter capture on by default.
pub const DEFAULT_CAPTURE_GC_INFO: bool = true;
