//! Telemetry metric name constants.
//!
//! Centralised metric names for the edge layer. Consumers install their own
//! `metrics` recorder (e.g. prometheus); without a recorder installed, all
//! metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `ojeomneo_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `status`: outcome: "allowed" / "limited", or "ok" / "fallback"
//! - `operation`: store operation: "get", "set", "scan", "delete"

/// Requests evaluated by the rate limiter.
///
/// Labels: `status` ("allowed" | "limited").
pub const RATELIMIT_REQUESTS_TOTAL: &str = "ojeomneo_ratelimit_requests_total";

/// Requests let through unchecked because the store failed.
pub const RATELIMIT_FAIL_OPEN_TOTAL: &str = "ojeomneo_ratelimit_fail_open_total";

/// Response cache hits.
pub const CACHE_HITS_TOTAL: &str = "ojeomneo_cache_hits_total";

/// Response cache misses (including store errors and corrupt payloads).
pub const CACHE_MISSES_TOTAL: &str = "ojeomneo_cache_misses_total";

/// Response cache store latency in seconds.
///
/// Labels: `operation` ("get" | "set").
pub const CACHE_OPERATION_DURATION_SECONDS: &str = "ojeomneo_cache_operation_duration_seconds";

/// Response cache keys removed by invalidation.
pub const CACHE_INVALIDATED_KEYS_TOTAL: &str = "ojeomneo_cache_invalidated_keys_total";

/// Store operations that failed or timed out.
///
/// Labels: `operation`.
pub const STORE_ERRORS_TOTAL: &str = "ojeomneo_store_errors_total";

/// Reasoning cache hits.
pub const REASON_CACHE_HITS_TOTAL: &str = "ojeomneo_reason_cache_hits_total";

/// Reasoning cache misses.
pub const REASON_CACHE_MISSES_TOTAL: &str = "ojeomneo_reason_cache_misses_total";

/// Reason generation attempts.
///
/// Labels: `status` ("ok" | "fallback").
pub const REASON_GENERATIONS_TOTAL: &str = "ojeomneo_reason_generations_total";
