//! Batch limits and attribution defaults.
//!
//! Per-field string limits live in the `#[validate]` attributes on the
//! record types, which only accept literals.

// === Batch Limits ===

/// Maximum raw batch payload size in bytes (4MB).
pub const MAX_BATCH_SIZE_BYTES: usize = 4 * 1024 * 1024;

/// Maximum records per batch.
pub const MAX_BATCH_RECORDS: usize = 10_000;

// === Timestamp Bounds ===

/// Default tolerated clock skew for future timestamps (seconds).
pub const DEFAULT_FUTURE_SKEW_SECS: i64 = 300;

// === Attribution ===

/// Default click lookback (7 days).
pub const DEFAULT_CLICK_WINDOW_HOURS: u32 = 7 * 24;

/// Default impression lookback (1 day).
pub const DEFAULT_IMPRESSION_WINDOW_HOURS: u32 = 24;

/// Default upper bound for day-N activity rollups.
pub const DEFAULT_MAX_DX: u32 = 30;
