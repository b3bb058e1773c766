//! Observability for the auth gateway.
//!
//! - `metrics` - Prometheus metric definitions (recorded through the
//!   `metrics` facade; the exporter is installed in `main`)

pub mod metrics;
