//! Metrics definitions for the auth gateway.
//!
//! All metrics follow Prometheus naming conventions:
//! - `gateway_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `outcome`: 8 values (see [`AUTH_OUTCOMES`])
//! - `status`: 5 values (success, key_not_found, malformed, transport_error, rate_limited)
//! - `result`: 3 values (hit, miss, joined)
//!
//! Key IDs, origins and paths are never used as labels.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Every value the `outcome` label can take.
pub const AUTH_OUTCOMES: &[&str] = &[
    "preflight",
    "authenticated",
    "header_missing",
    "scheme_invalid",
    "token_malformed",
    "key_resolution_failed",
    "verification_failed",
    "internal",
];

/// Install the Prometheus recorder and serve scrapes on `addr`.
///
/// Must be called from within the Tokio runtime, before any metrics are
/// recorded. Scrapes are served on their own listener so the gateway's path
/// space stays with the downstream router.
///
/// # Errors
///
/// Returns error if the buckets are rejected or the recorder fails to install
/// (e.g., already installed, or the address cannot be bound).
pub fn init_metrics_exporter(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        // Admission is sub-millisecond on a cache hit
        .set_buckets_for_metric(
            Matcher::Prefix("gateway_auth".to_string()),
            &[
                0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set auth buckets: {e}"))?
        // JWKS fetches are bounded by the fetch timeout (at most 60s)
        .set_buckets_for_metric(
            Matcher::Prefix("gateway_jwks_fetch".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000, 60.000],
        )
        .map_err(|e| format!("Failed to set JWKS fetch buckets: {e}"))?
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))
}

// ============================================================================
// Admission Metrics
// ============================================================================

/// Record one admission decision.
///
/// Metric: `gateway_auth_decisions_total`, `gateway_auth_duration_seconds`
/// Labels: `outcome`
///
/// Duration covers the gateway's own work (extraction and verification,
/// including any JWKS fetch), not the downstream handler.
pub fn record_auth_decision(outcome: &'static str, duration: Duration) {
    histogram!("gateway_auth_duration_seconds",
        "outcome" => outcome
    )
    .record(duration.as_secs_f64());

    counter!("gateway_auth_decisions_total",
        "outcome" => outcome
    )
    .increment(1);
}

// ============================================================================
// JWKS Metrics
// ============================================================================

/// Record a JWKS fetch attempt.
///
/// Metric: `gateway_jwks_fetches_total`, `gateway_jwks_fetch_duration_seconds`
/// Labels: `status`
///
/// Attempts refused by the rate limiter are counted with status
/// `rate_limited` but never reach the histogram.
pub fn record_jwks_fetch(status: &'static str, duration: Duration) {
    counter!("gateway_jwks_fetches_total",
        "status" => status
    )
    .increment(1);

    if status != "rate_limited" {
        histogram!("gateway_jwks_fetch_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Record a key cache lookup.
///
/// Metric: `gateway_jwks_cache_lookups_total`
/// Labels: `result` (`hit`, `miss`, `joined`)
pub fn record_jwks_cache_lookup(result: &'static str) {
    counter!("gateway_jwks_cache_lookups_total",
        "result" => result
    )
    .increment(1);
}
