//! Gateway error types.
//!
//! Every admission failure collapses into one of a handful of client-facing
//! kinds, each with a fixed plain-text body. The precise reason is logged
//! server-side at debug level.

use crate::auth::jwt::VerifyError;
use crate::middleware::cors::CorsContext;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Client-facing gateway error.
///
/// Maps to HTTP status codes:
/// - Internal: 500 Internal Server Error
/// - Everything else: 401 Unauthorized
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Authorization header is missing")]
    HeaderMissing,

    #[error("Authorization scheme is not Bearer")]
    SchemeInvalid,

    #[error("Token is malformed")]
    TokenMalformed,

    #[error("Signing key could not be resolved")]
    KeyResolutionFailed,

    #[error("Token signature or claims are invalid")]
    SignatureOrClaimInvalid,

    #[error("Internal server error")]
    Internal,
}

impl GatewayError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// The exact response body sent to the client.
    pub fn message(&self) -> &'static str {
        match self {
            GatewayError::HeaderMissing => "\"Authorization\" header is not found\n",
            GatewayError::SchemeInvalid => "Invalid \"Authorization\" scheme\n",
            GatewayError::TokenMalformed => "Invalid token\n",
            GatewayError::KeyResolutionFailed => "Failed to sign key\n",
            GatewayError::SignatureOrClaimInvalid => "Failed to verify token\n",
            GatewayError::Internal => "Internal server error\n",
        }
    }

    /// Bounded label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            GatewayError::HeaderMissing => "header_missing",
            GatewayError::SchemeInvalid => "scheme_invalid",
            GatewayError::TokenMalformed => "token_malformed",
            GatewayError::KeyResolutionFailed => "key_resolution_failed",
            GatewayError::SignatureOrClaimInvalid => "verification_failed",
            GatewayError::Internal => "internal",
        }
    }

    /// Attach the request's CORS context so the rejection carries the right
    /// `Access-Control-Allow-Origin`.
    pub fn with_cors(self, cors: &CorsContext) -> Rejection {
        Rejection {
            error: self,
            allow_origin: cors.allow_origin(),
        }
    }
}

impl From<VerifyError> for GatewayError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::MalformedToken => GatewayError::TokenMalformed,
            VerifyError::UnknownSigningKey(_) => GatewayError::KeyResolutionFailed,
            VerifyError::AlgorithmNotAllowed(_)
            | VerifyError::SignatureInvalid
            | VerifyError::ClaimRejected(_) => GatewayError::SignatureOrClaimInvalid,
        }
    }
}

/// A [`GatewayError`] bound to the origin of the request it rejects.
#[derive(Debug)]
pub struct Rejection {
    error: GatewayError,
    allow_origin: HeaderValue,
}

impl Rejection {
    /// The underlying error.
    pub fn error(&self) -> &GatewayError {
        &self.error
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (
            self.error.status_code(),
            [
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin),
                (
                    header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                    HeaderValue::from_static("true"),
                ),
                (header::CONTENT_TYPE, HeaderValue::from_static("text/plain")),
            ],
            self.error.message(),
        )
            .into_response()
    }
}

/// Renders with a wildcard origin; used where no request is at hand (panics).
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.with_cors(&CorsContext::default()).into_response()
    }
}
