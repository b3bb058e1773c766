//! JWT verification.
//!
//! Verifies bearer tokens with public keys resolved through the JWKS key cache.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only RS256 is accepted; `none` and HMAC are rejected before any key lookup
//! - `exp` is required; `exp`/`nbf` are checked against an injectable clock
//! - Issuer and audience are checked when configured
//! - Rejection reasons are logged at debug level only

use crate::auth::claims::VerifiedClaims;
use crate::auth::jwks::{JwksClient, KeyCacheError};
use common::jwt::{
    decode_header, decode_segment, split_token, validate_exp_at, validate_nbf_at, Clock,
    SystemClock, DEFAULT_CLOCK_SKEW,
};
use jsonwebtoken::Algorithm;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Signature algorithms a token may declare.
pub const ALLOWED_ALGORITHMS: &[Algorithm] = &[Algorithm::RS256];

/// Why a token was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("Token is malformed")]
    MalformedToken,

    #[error("Algorithm {0} is not allowed")]
    AlgorithmNotAllowed(String),

    #[error("Signing key could not be resolved: {0}")]
    UnknownSigningKey(#[source] KeyCacheError),

    #[error("Token signature is invalid")]
    SignatureInvalid,

    #[error("Claim {0} rejected")]
    ClaimRejected(&'static str),
}

/// Claim requirements, fixed at startup.
#[derive(Debug, Clone)]
pub struct VerifyPolicy {
    /// Required exact `iss`, if any.
    pub issuer: Option<String>,

    /// Audience that must appear in `aud`, if any.
    pub audience: Option<String>,

    /// Tolerance applied to `exp` and `nbf`.
    pub clock_skew: Duration,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }
}

/// JWT validator backed by the JWKS key cache.
#[derive(Clone)]
pub struct JwtValidator {
    jwks_client: JwksClient,
    policy: VerifyPolicy,
    clock: Arc<dyn Clock>,
}

impl JwtValidator {
    /// Create a validator that checks time claims against the system clock.
    ///
    /// # Arguments
    ///
    /// * `jwks_client` - Key cache for signing key resolution
    /// * `policy` - Issuer, audience and skew requirements
    pub fn new(jwks_client: JwksClient, policy: VerifyPolicy) -> Self {
        Self::with_clock(jwks_client, policy, Arc::new(SystemClock))
    }

    /// Create a validator with an explicit clock.
    pub fn with_clock(jwks_client: JwksClient, policy: VerifyPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            jwks_client,
            policy,
            clock,
        }
    }

    /// The key cache this validator resolves keys through.
    pub fn jwks_client(&self) -> &JwksClient {
        &self.jwks_client
    }

    pub fn policy(&self) -> &VerifyPolicy {
        &self.policy
    }

    /// Verify a compact JWT and return its claims.
    ///
    /// # Checks, in order
    ///
    /// 1. Size and structure; header and payload must decode to JSON objects
    /// 2. Declared algorithm must be allowed (no key lookup otherwise)
    /// 3. Signing key resolved by `kid`
    /// 4. RS256 signature over `header.payload`
    /// 5. `exp`, `nbf`, `iss`, `aud`
    ///
    /// # Errors
    ///
    /// Returns the first check that failed as a `VerifyError`.
    #[instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Result<VerifiedClaims, VerifyError> {
        let parts = split_token(token).map_err(|e| {
            tracing::debug!(target: "gateway.auth.jwt", error = ?e, "Token structure rejected");
            VerifyError::MalformedToken
        })?;

        let header = decode_header(&parts).map_err(|e| {
            tracing::debug!(target: "gateway.auth.jwt", error = ?e, "Token header rejected");
            VerifyError::MalformedToken
        })?;

        let payload = decode_segment(parts.payload).map_err(|e| {
            tracing::debug!(target: "gateway.auth.jwt", error = ?e, "Token payload rejected");
            VerifyError::MalformedToken
        })?;

        let claims: VerifiedClaims = serde_json::from_value(Value::Object(payload)).map_err(|e| {
            tracing::debug!(target: "gateway.auth.jwt", error = %e, "Token claims have invalid types");
            VerifyError::MalformedToken
        })?;

        let algorithm = allowed_algorithm(&header.alg)?;

        let key = self
            .jwks_client
            .resolve(header.kid.as_deref())
            .await
            .map_err(|e| {
                tracing::debug!(target: "gateway.auth.jwt", error = %e, "Signing key resolution failed");
                VerifyError::UnknownSigningKey(e)
            })?;

        let signing_input = parts.signing_input();
        match jsonwebtoken::crypto::verify(
            parts.signature,
            signing_input.as_bytes(),
            key.decoding_key(),
            algorithm,
        ) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(target: "gateway.auth.jwt", "Token signature mismatch");
                return Err(VerifyError::SignatureInvalid);
            }
            Err(e) => {
                tracing::debug!(target: "gateway.auth.jwt", error = %e, "Token signature could not be checked");
                return Err(VerifyError::SignatureInvalid);
            }
        }

        check_claims(&claims, &self.policy, self.clock.now_timestamp())?;

        tracing::debug!(target: "gateway.auth.jwt", "Token validated successfully");
        Ok(claims)
    }
}

/// Map a header `alg` to an allowed algorithm.
///
/// # Errors
///
/// `AlgorithmNotAllowed` for anything outside [`ALLOWED_ALGORITHMS`],
/// including names `jsonwebtoken` does not know such as `none`.
pub fn allowed_algorithm(alg: &str) -> Result<Algorithm, VerifyError> {
    match Algorithm::from_str(alg) {
        Ok(algorithm) if ALLOWED_ALGORITHMS.contains(&algorithm) => Ok(algorithm),
        _ => {
            tracing::debug!(target: "gateway.auth.jwt", alg = %alg, "Token algorithm not allowed");
            Err(VerifyError::AlgorithmNotAllowed(alg.to_string()))
        }
    }
}

/// Check time, issuer and audience claims.
///
/// # Errors
///
/// `ClaimRejected` naming the first claim that failed.
pub fn check_claims(
    claims: &VerifiedClaims,
    policy: &VerifyPolicy,
    now: i64,
) -> Result<(), VerifyError> {
    let exp = claims.exp.ok_or_else(|| {
        tracing::debug!(target: "gateway.auth.jwt", "Token has no exp claim");
        VerifyError::ClaimRejected("exp")
    })?;
    validate_exp_at(exp, policy.clock_skew, now).map_err(|_| VerifyError::ClaimRejected("exp"))?;

    if let Some(nbf) = claims.nbf {
        validate_nbf_at(nbf, policy.clock_skew, now)
            .map_err(|_| VerifyError::ClaimRejected("nbf"))?;
    }

    if let Some(expected) = &policy.issuer {
        if claims.iss.as_deref() != Some(expected.as_str()) {
            tracing::debug!(target: "gateway.auth.jwt", "Token issuer mismatch");
            return Err(VerifyError::ClaimRejected("iss"));
        }
    }

    if let Some(expected) = &policy.audience {
        let matches = claims
            .aud
            .as_ref()
            .is_some_and(|aud| aud.contains(expected));
        if !matches {
            tracing::debug!(target: "gateway.auth.jwt", "Token audience mismatch");
            return Err(VerifyError::ClaimRejected("aud"));
        }
    }

    Ok(())
}
