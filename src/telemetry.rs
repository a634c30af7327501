//! Telemetry metric name constants.
//!
//! Centralised metric names for muninn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `kind`: artifact kind: "audio" or "video"
//! - `operation`: HTTP operation being retried
//! - `status`: outcome: "ok" or "error"
//! - `reason`: eviction reason: "ttl" or "capacity"

/// Total retry attempts (not counting the initial request).
///
/// Labels: `operation`.
pub const DOWNLOAD_RETRIES_TOTAL: &str = "muninn_download_retries_total";

/// Total media bytes received from the network.
pub const DOWNLOADED_BYTES_TOTAL: &str = "muninn_downloaded_bytes_total";

/// Total liveness probes that found a stale URL.
pub const STALE_URLS_TOTAL: &str = "muninn_stale_urls_total";

/// Total artifact requests served from a ready cache slot.
///
/// Labels: `kind`.
pub const CACHE_HITS_TOTAL: &str = "muninn_cache_hits_total";

/// Total artifact requests that had to wait for or start a production.
///
/// Labels: `kind`.
pub const CACHE_MISSES_TOTAL: &str = "muninn_cache_misses_total";

/// Total finished productions.
///
/// Labels: `kind`, `status` ("ok" | "error").
pub const PRODUCTIONS_TOTAL: &str = "muninn_productions_total";

/// Production duration in seconds, from start to ready or failed.
///
/// Labels: `kind`.
pub const PRODUCTION_DURATION_SECONDS: &str = "muninn_production_duration_seconds";

/// Total cache entries evicted.
///
/// Labels: `reason` ("ttl" | "capacity").
pub const EVICTIONS_TOTAL: &str = "muninn_evictions_total";
