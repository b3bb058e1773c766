//! Authentication middleware.
//!
//! Answers CORS preflight, extracts the Bearer token from the Authorization
//! header, verifies it, and hands the request to the downstream handler with
//! the verified claims in its extensions.

use crate::auth::VerifiedClaims;
use crate::errors::{GatewayError, Rejection};
use crate::middleware::cors::CorsContext;
use crate::observability::metrics;
use crate::routes::GatewayState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

const BEARER_PREFIX: &str = "Bearer ";

/// Authentication middleware.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// The scheme is matched case-insensitively.
///
/// # Response
///
/// - `OPTIONS`: 200 preflight answer, token not required
/// - Missing or invalid token: 401 plain text, downstream not called
/// - Valid token: downstream response with CORS headers merged in
#[instrument(skip_all, name = "gateway.middleware.auth", fields(method = %req.method()))]
pub async fn require_auth(
    State(state): State<Arc<GatewayState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let start = Instant::now();
    let cors = CorsContext::from_headers(req.headers());

    if req.method() == Method::OPTIONS {
        tracing::debug!(target: "gateway.middleware.auth", "Answering preflight");
        metrics::record_auth_decision("preflight", start.elapsed());
        return Ok(state.cors.preflight_response(&cors));
    }

    let claims = match authenticate(&state, req.headers()).await {
        Ok(claims) => claims,
        Err(err) => {
            tracing::debug!(target: "gateway.middleware.auth", outcome = err.outcome(), "Request rejected");
            metrics::record_auth_decision(err.outcome(), start.elapsed());
            return Err(err.with_cors(&cors));
        }
    };

    metrics::record_auth_decision("authenticated", start.elapsed());

    // Store claims in request extensions for downstream handlers
    req.extensions_mut().insert(claims);

    let adapter = state.cors.adapter(&cors);
    Ok(adapter.wrap(next.run(req).await))
}

async fn authenticate(
    state: &GatewayState,
    headers: &HeaderMap,
) -> Result<VerifiedClaims, GatewayError> {
    let token = extract_bearer_token(headers)?;

    state.jwt_validator.validate(token).await.map_err(|e| {
        tracing::debug!(target: "gateway.middleware.auth", error = %e, "Token verification failed");
        GatewayError::from(e)
    })
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The token itself is not inspected; an empty token is returned as such.
///
/// # Errors
///
/// - `HeaderMissing` - No Authorization header
/// - `SchemeInvalid` - Not a Bearer credential (or not valid header text)
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, GatewayError> {
    let value = headers.get(header::AUTHORIZATION).ok_or_else(|| {
        tracing::debug!(target: "gateway.middleware.auth", "Missing Authorization header");
        GatewayError::HeaderMissing
    })?;

    let value = value.to_str().map_err(|_| {
        tracing::debug!(target: "gateway.middleware.auth", "Authorization header is not valid text");
        GatewayError::SchemeInvalid
    })?;

    match (value.get(..BEARER_PREFIX.len()), value.get(BEARER_PREFIX.len()..)) {
        (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case(BEARER_PREFIX) => Ok(token),
        _ => {
            tracing::debug!(target: "gateway.middleware.auth", "Invalid Authorization header format");
            Err(GatewayError::SchemeInvalid)
        }
    }
}

/// Extension trait for extracting claims from request.
///
/// Provides a convenient method for downstream handlers to get the
/// authenticated claims.
pub trait ClaimsExt {
    /// Get the authenticated claims from request extensions.
    ///
    /// Returns `None` if auth middleware was not applied to this request.
    fn claims(&self) -> Option<&VerifiedClaims>;
}

impl<B> ClaimsExt for axum::http::Request<B> {
    fn claims(&self) -> Option<&VerifiedClaims> {
        self.extensions().get::<VerifiedClaims>()
    }
}
