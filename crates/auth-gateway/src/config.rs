//! Auth Gateway configuration.
//!
//! Configuration is loaded from environment variables and validated eagerly,
//! so a misconfigured gateway refuses to start instead of rejecting every
//! request at runtime.

use axum::http::HeaderName;
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use std::collections::HashMap;
use std::env;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default bind host.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default JWKS fetch budget in requests per minute.
pub const DEFAULT_JWKS_REQUESTS_PER_MINUTE: u32 = 5;

/// Default JWKS fetch timeout in seconds.
pub const DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 10;

/// Upper bound for the JWKS fetch timeout in seconds.
pub const MAX_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 60;

/// Default shutdown drain period in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 30;

/// Upper bound for the shutdown drain period in seconds.
pub const MAX_DRAIN_SECONDS: u64 = 300;

/// Default custom header advertised in `Access-Control-Allow-Headers`.
pub const DEFAULT_CORS_CUSTOM_HEADERS: &str = "X-Piping";

/// Auth Gateway configuration.
///
/// Loaded from environment variables with sensible defaults. Nothing in here
/// is secret, so the derived Debug output is safe to log.
#[derive(Debug, Clone)]
pub struct Config {
    /// JWKS endpoint of the trusted identity provider (required).
    pub jwks_uri: String,

    /// Expected `iss` claim (exact match), if any.
    pub jwt_issuer: Option<String>,

    /// Expected member of the `aud` claim, if any.
    pub jwt_audience: Option<String>,

    /// Host to bind (default: "0.0.0.0").
    pub bind_host: String,

    /// Port to bind (default: 8080).
    pub http_port: u16,

    /// JWKS fetch budget (default: 5 per minute).
    pub jwks_requests_per_minute: NonZeroU32,

    /// Whether resolved signing keys are cached (default: true).
    pub jwks_cache_enabled: bool,

    /// Optional lifetime of a cached signing key. `None` keeps keys for the
    /// lifetime of the process.
    pub jwks_cache_ttl: Option<Duration>,

    /// Upper bound on a single JWKS fetch (default: 10 seconds).
    pub jwks_fetch_timeout: Duration,

    /// Clock skew tolerance for `exp`/`nbf` (default: 0).
    pub jwt_clock_skew: Duration,

    /// Custom headers added to `Access-Control-Allow-Headers`.
    pub cors_custom_headers: Vec<String>,

    /// Address for the Prometheus scrape listener, if metrics are exported.
    pub metrics_bind_address: Option<String>,

    /// Wait after a shutdown signal before closing connections (default: 30
    /// seconds, zero skips it).
    pub drain_period: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWKS URI: {0}")]
    InvalidJwksUri(String),

    #[error("Invalid HTTP port: {0}")]
    InvalidHttpPort(String),

    #[error("Invalid JWKS rate limit configuration: {0}")]
    InvalidRateLimit(String),

    #[error("Invalid JWKS cache configuration: {0}")]
    InvalidCache(String),

    #[error("Invalid JWKS fetch timeout configuration: {0}")]
    InvalidFetchTimeout(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid CORS configuration: {0}")]
    InvalidCors(String),

    #[error("Invalid drain period: {0}")]
    InvalidDrainPeriod(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let jwks_uri = non_empty(vars, "JWKS_URI")
            .ok_or_else(|| ConfigError::MissingEnvVar("JWKS_URI".to_string()))?;

        if !(jwks_uri.starts_with("http://") || jwks_uri.starts_with("https://")) {
            return Err(ConfigError::InvalidJwksUri(format!(
                "JWKS_URI must be an http(s) URL, got '{}'",
                jwks_uri
            )));
        }
        if jwks_uri.starts_with("http://") {
            tracing::warn!(
                target: "gateway.config",
                jwks_uri = %jwks_uri,
                "JWKS_URI is not HTTPS; keys can be tampered with in transit"
            );
        }

        let jwt_issuer = non_empty(vars, "JWT_ISSUER");
        let jwt_audience = non_empty(vars, "JWT_AUDIENCE");

        let bind_host = vars
            .get("BIND_HOST")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_HOST.to_string());

        let http_port = if let Some(value_str) = vars.get("HTTP_PORT") {
            value_str.parse::<u16>().map_err(|e| {
                ConfigError::InvalidHttpPort(format!(
                    "HTTP_PORT must be an integer in 0..=65535, got '{}': {}",
                    value_str, e
                ))
            })?
        } else {
            DEFAULT_HTTP_PORT
        };

        // Parse JWKS rate limit with validation
        let jwks_requests_per_minute =
            if let Some(value_str) = vars.get("JWKS_REQUESTS_PER_MINUTE") {
                let value: u32 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidRateLimit(format!(
                        "JWKS_REQUESTS_PER_MINUTE must be a valid positive integer, got '{}': {}",
                        value_str, e
                    ))
                })?;

                NonZeroU32::new(value).ok_or_else(|| {
                    ConfigError::InvalidRateLimit(
                        "JWKS_REQUESTS_PER_MINUTE must be greater than 0".to_string(),
                    )
                })?
            } else {
                NonZeroU32::new(DEFAULT_JWKS_REQUESTS_PER_MINUTE).unwrap_or(NonZeroU32::MIN)
            };

        let jwks_cache_enabled = match vars.get("JWKS_CACHE_ENABLED").map(String::as_str) {
            None => true,
            Some(value) => parse_bool(value).ok_or_else(|| {
                ConfigError::InvalidCache(format!(
                    "JWKS_CACHE_ENABLED must be true or false, got '{}'",
                    value
                ))
            })?,
        };

        let jwks_cache_ttl = if let Some(value_str) = vars.get("JWKS_CACHE_TTL_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidCache(format!(
                    "JWKS_CACHE_TTL_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidCache(
                    "JWKS_CACHE_TTL_SECONDS must be greater than 0".to_string(),
                ));
            }

            Some(Duration::from_secs(value))
        } else {
            None
        };

        let jwks_fetch_timeout = if let Some(value_str) = vars.get("JWKS_FETCH_TIMEOUT_SECONDS")
        {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidFetchTimeout(format!(
                    "JWKS_FETCH_TIMEOUT_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 || value > MAX_JWKS_FETCH_TIMEOUT_SECONDS {
                return Err(ConfigError::InvalidFetchTimeout(format!(
                    "JWKS_FETCH_TIMEOUT_SECONDS must be between 1 and {}, got {}",
                    MAX_JWKS_FETCH_TIMEOUT_SECONDS, value
                )));
            }

            Duration::from_secs(value)
        } else {
            Duration::from_secs(DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS)
        };

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value < 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not be negative, got {}",
                    value
                )));
            }

            if value.unsigned_abs() > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            Duration::from_secs(value.unsigned_abs())
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let cors_custom_headers = parse_header_names(
            vars.get("CORS_CUSTOM_HEADERS")
                .map(String::as_str)
                .unwrap_or(DEFAULT_CORS_CUSTOM_HEADERS),
        )?;

        let metrics_bind_address = non_empty(vars, "METRICS_BIND_ADDRESS");

        let drain_period = if let Some(value_str) = vars.get("GATEWAY_DRAIN_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidDrainPeriod(format!(
                    "GATEWAY_DRAIN_SECONDS must be a non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value > MAX_DRAIN_SECONDS {
                return Err(ConfigError::InvalidDrainPeriod(format!(
                    "GATEWAY_DRAIN_SECONDS must not exceed {}, got {}",
                    MAX_DRAIN_SECONDS, value
                )));
            }

            Duration::from_secs(value)
        } else {
            Duration::from_secs(DEFAULT_DRAIN_SECONDS)
        };

        Ok(Config {
            jwks_uri,
            jwt_issuer,
            jwt_audience,
            bind_host,
            http_port,
            jwks_requests_per_minute,
            jwks_cache_enabled,
            jwks_cache_ttl,
            jwks_fetch_timeout,
            jwt_clock_skew,
            cors_custom_headers,
            metrics_bind_address,
            drain_period,
        })
    }

    /// `host:port` for the HTTP listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.http_port)
    }
}

/// Value of `key`, treating empty strings as unset.
fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key).filter(|v| !v.trim().is_empty()).cloned()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parse a comma-separated list of header names, preserving their spelling.
fn parse_header_names(raw: &str) -> Result<Vec<String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            HeaderName::from_str(name)
                .map(|_| name.to_string())
                .map_err(|e| {
                    ConfigError::InvalidCors(format!(
                        "CORS_CUSTOM_HEADERS contains invalid header name '{}': {}",
                        name, e
                    ))
                })
        })
        .collect()
}
