//! HTTP routes for the auth gateway.
//!
//! The gateway owns no paths of its own. It layers admission over a
//! downstream router, which receives every request that passes.

use crate::auth::{JwksCacheConfig, JwksClient, JwtValidator, VerifyPolicy};
use crate::config::{Config, ConfigError};
use crate::errors::GatewayError;
use crate::middleware::{require_auth, CorsPolicy};
use crate::observability::metrics;
use axum::{middleware, response::IntoResponse, response::Response, Router};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

/// State shared by every request through one gateway instance.
///
/// Holds the key cache (with its rate limiter) inside the validator. Two
/// gateways built from two states share nothing.
#[derive(Clone)]
pub struct GatewayState {
    /// JWT validator with JWKS client.
    pub jwt_validator: JwtValidator,

    /// CORS header values.
    pub cors: CorsPolicy,
}

impl GatewayState {
    pub fn new(jwt_validator: JwtValidator, cors: CorsPolicy) -> Self {
        Self {
            jwt_validator,
            cors,
        }
    }

    /// Build the key cache, validator and CORS policy from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidCors` if the custom CORS headers cannot be
    /// rendered into a header value.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let jwks_client = JwksClient::with_config(JwksCacheConfig {
            jwks_url: config.jwks_uri.clone(),
            cache_enabled: config.jwks_cache_enabled,
            cache_ttl: config.jwks_cache_ttl,
            requests_per_minute: Some(config.jwks_requests_per_minute),
            fetch_timeout: config.jwks_fetch_timeout,
        });

        let policy = VerifyPolicy {
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            clock_skew: config.jwt_clock_skew,
        };

        let cors = CorsPolicy::new(config.cors_custom_headers.as_slice())
            .map_err(|e| ConfigError::InvalidCors(e.to_string()))?;

        Ok(Self::new(JwtValidator::new(jwks_client, policy), cors))
    }
}

/// Put the gateway in front of `downstream`.
///
/// Layer order (outermost first):
/// 1. CatchPanicLayer - A panic anywhere below becomes a 500
/// 2. TraceLayer - Log request details
/// 3. Admission middleware
/// 4. `downstream`, including its fallback
pub fn build_routes(state: Arc<GatewayState>, downstream: Router) -> Router {
    downstream
        .layer(middleware::from_fn_with_state(state, require_auth))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(target: "gateway.routes", panic = %detail, "Request handler panicked");

    let err = GatewayError::Internal;
    metrics::record_auth_decision(err.outcome(), Duration::ZERO);
    err.into_response()
}
