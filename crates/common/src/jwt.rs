//! JWT utilities shared across gateway components.
//!
//! This module provides the structural half of token verification:
//! - Size limits for DoS prevention
//! - Clock skew constants and a pluggable clock
//! - Compact-serialization splitting and header/payload decoding
//! - Time-based claim checks (`exp`, `nbf`)
//!
//! Nothing in here verifies a signature. Callers MUST verify the signature
//! against a trusted key before acting on anything decoded by this module.
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{split_token, decode_header, validate_exp_at};
//!
//! let parts = split_token(token)?;
//! let header = decode_header(&parts)?;
//! // look up header.kid in a trusted JWKS, verify the signature ...
//! validate_exp_at(exp, skew, now)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any parsing or cryptographic
/// operations.
///
/// - Typical RS256 tokens are 600-1200 bytes (2048-bit signature is 342 chars)
/// - 8KB leaves room for large claim sets while bounding base64/JSON work
///
/// Per OWASP API Security Top 10 - API4:2023 (Unrestricted Resource Consumption)
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance.
///
/// Zero: `exp` and `nbf` are compared against the wall clock exactly.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(0);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// Prevents misconfiguration that would accept long-expired tokens.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while decoding or time-checking a JWT.
///
/// Note: Display messages are intentionally generic. Detailed information is
/// logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid")]
    TokenTooLarge,

    /// Token format is invalid (not a valid compact JWT).
    #[error("The access token is invalid")]
    MalformedToken,

    /// Token `exp` claim is in the past (beyond skew tolerance).
    #[error("The access token is expired")]
    Expired,

    /// Token `nbf` claim is in the future (beyond skew tolerance).
    #[error("The access token is not yet valid")]
    NotYetValid,
}

// =============================================================================
// Clock
// =============================================================================

/// Source of the current time for claim validation.
///
/// Production code uses [`SystemClock`]; tests inject a fixed clock so that
/// `exp`/`nbf` boundaries can be exercised deterministically.
pub trait Clock: Send + Sync {
    /// Current time as Unix epoch seconds.
    fn now_timestamp(&self) -> i64;
}

/// Wall-clock time via `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_timestamp(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A clock frozen at a given timestamp.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_timestamp(&self) -> i64 {
        self.0
    }
}

// =============================================================================
// Token structure
// =============================================================================

/// The three base64url segments of a compact JWT, borrowed from the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenParts<'a> {
    /// Encoded header segment.
    pub header: &'a str,
    /// Encoded payload segment.
    pub payload: &'a str,
    /// Encoded signature segment.
    pub signature: &'a str,
}

impl TokenParts<'_> {
    /// The bytes covered by the signature: `header.payload`.
    #[must_use]
    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.header, self.payload)
    }
}

/// JOSE header fields needed to select a verification key.
///
/// Decoded WITHOUT signature validation. Never use it for authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Declared signing algorithm (`alg`), verbatim.
    pub alg: String,
    /// Key ID (`kid`), if the token names one.
    pub kid: Option<String>,
}

/// Split a compact JWT into its three segments.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Not exactly three non-empty-header segments
pub fn split_token(token: &str) -> Result<TokenParts<'_>, JwtValidationError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    if header.is_empty() || payload.is_empty() {
        tracing::debug!(target: "common.jwt", "Token rejected: empty segment");
        return Err(JwtValidationError::MalformedToken);
    }

    Ok(TokenParts {
        header,
        payload,
        signature,
    })
}

/// Decode a base64url segment into a JSON object.
///
/// # Errors
///
/// Returns `MalformedToken` on bad base64, bad JSON, or a non-object value.
pub fn decode_segment(segment: &str) -> Result<Map<String, Value>, JwtValidationError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT segment base64");
        JwtValidationError::MalformedToken
    })?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => {
            tracing::debug!(target: "common.jwt", "JWT segment is not a JSON object");
            Err(JwtValidationError::MalformedToken)
        }
        Err(e) => {
            tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT segment JSON");
            Err(JwtValidationError::MalformedToken)
        }
    }
}

/// Extract `alg` and `kid` from the header segment.
///
/// `kid` may be absent, but when present it must be a non-empty string.
///
/// # Errors
///
/// Returns `MalformedToken` if the header cannot be decoded, `alg` is missing
/// or not a string, or `kid` is present with an empty or non-string value.
pub fn decode_header(parts: &TokenParts<'_>) -> Result<TokenHeader, JwtValidationError> {
    let header = decode_segment(parts.header)?;

    let alg = header
        .get("alg")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| {
            tracing::debug!(target: "common.jwt", "JWT header missing alg");
            JwtValidationError::MalformedToken
        })?;

    let kid = match header.get("kid") {
        None => None,
        Some(Value::String(kid)) if !kid.is_empty() => Some(kid.clone()),
        Some(_) => {
            tracing::debug!(target: "common.jwt", "JWT header has invalid kid");
            return Err(JwtValidationError::MalformedToken);
        }
    };

    Ok(TokenHeader { alg, kid })
}

// =============================================================================
// Time-based claims
// =============================================================================

/// Reject a token whose `exp` is at or before `now - clock_skew`.
///
/// # Errors
///
/// Returns `JwtValidationError::Expired` when the token has expired.
pub fn validate_exp_at(exp: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    let skew = skew_seconds(clock_skew);
    if exp.saturating_add(skew) <= now {
        tracing::debug!(
            target: "common.jwt",
            exp = exp,
            now = now,
            clock_skew_secs = skew,
            "Token rejected: expired"
        );
        return Err(JwtValidationError::Expired);
    }
    Ok(())
}

/// Reject a token whose `nbf` is after `now + clock_skew`.
///
/// # Errors
///
/// Returns `JwtValidationError::NotYetValid` when the token is not yet valid.
pub fn validate_nbf_at(nbf: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    let skew = skew_seconds(clock_skew);
    if nbf > now.saturating_add(skew) {
        tracing::debug!(
            target: "common.jwt",
            nbf = nbf,
            now = now,
            clock_skew_secs = skew,
            "Token rejected: not yet valid"
        );
        return Err(JwtValidationError::NotYetValid);
    }
    Ok(())
}

// Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW by configuration
#[allow(clippy::cast_possible_wrap)]
fn skew_seconds(clock_skew: Duration) -> i64 {
    clock_skew.as_secs() as i64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn encode(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    fn token_with_header(header: &str) -> String {
        format!("{}.{}.sig", encode(header), encode(r#"{"sub":"x"}"#))
    }

    #[test]
    fn test_split_token_valid() {
        let parts = split_token("aaa.bbb.ccc").unwrap();
        assert_eq!(parts.header, "aaa");
        assert_eq!(parts.payload, "bbb");
        assert_eq!(parts.signature, "ccc");
        assert_eq!(parts.signing_input(), "aaa.bbb");
    }

    #[test]
    fn test_split_token_wrong_segment_count() {
        assert_eq!(
            split_token("not.a.valid.jwt.format"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(
            split_token("only.two"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(split_token("single"), Err(JwtValidationError::MalformedToken));
        assert_eq!(split_token(""), Err(JwtValidationError::MalformedToken));
    }

    #[test]
    fn test_split_token_empty_header() {
        assert_eq!(
            split_token(".payload.signature"),
            Err(JwtValidationError::MalformedToken)
        );
    }

    #[test]
    fn test_split_token_size_limit() {
        let at_limit = format!("{}.b.c", "a".repeat(MAX_JWT_SIZE_BYTES - 4));
        assert_eq!(at_limit.len(), MAX_JWT_SIZE_BYTES);
        assert!(split_token(&at_limit).is_ok());

        let over_limit = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            split_token(&over_limit),
            Err(JwtValidationError::TokenTooLarge)
        );
    }

    #[test]
    fn test_decode_header_with_kid() {
        let token = token_with_header(r#"{"alg":"RS256","typ":"JWT","kid":"key-01"}"#);
        let header = decode_header(&split_token(&token).unwrap()).unwrap();
        assert_eq!(header.alg, "RS256");
        assert_eq!(header.kid.as_deref(), Some("key-01"));
    }

    #[test]
    fn test_decode_header_without_kid() {
        let token = token_with_header(r#"{"alg":"RS256","typ":"JWT"}"#);
        let header = decode_header(&split_token(&token).unwrap()).unwrap();
        assert!(header.kid.is_none());
    }

    #[test]
    fn test_decode_header_keeps_unknown_alg_verbatim() {
        let token = token_with_header(r#"{"alg":"none"}"#);
        let header = decode_header(&split_token(&token).unwrap()).unwrap();
        assert_eq!(header.alg, "none");
    }

    #[test]
    fn test_decode_header_rejects_bad_kid_values() {
        for header in [
            r#"{"alg":"RS256","kid":""}"#,
            r#"{"alg":"RS256","kid":12345}"#,
            r#"{"alg":"RS256","kid":null}"#,
        ] {
            let token = token_with_header(header);
            assert_eq!(
                decode_header(&split_token(&token).unwrap()),
                Err(JwtValidationError::MalformedToken),
                "header {header} should be rejected"
            );
        }
    }

    #[test]
    fn test_decode_header_missing_alg() {
        let token = token_with_header(r#"{"kid":"key-01"}"#);
        assert_eq!(
            decode_header(&split_token(&token).unwrap()),
            Err(JwtValidationError::MalformedToken)
        );
    }

    #[test]
    fn test_decode_segment_invalid_base64() {
        assert_eq!(
            decode_segment("!!!invalid!!!"),
            Err(JwtValidationError::MalformedToken)
        );
    }

    #[test]
    fn test_decode_segment_rejects_non_object() {
        assert_eq!(
            decode_segment(&encode("not valid json")),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(
            decode_segment(&encode("[1,2,3]")),
            Err(JwtValidationError::MalformedToken)
        );
    }

    #[test]
    fn test_validate_exp_boundaries() {
        let now = 1_700_000_000;
        assert!(validate_exp_at(now + 1, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert_eq!(
            validate_exp_at(now, DEFAULT_CLOCK_SKEW, now),
            Err(JwtValidationError::Expired)
        );
        assert_eq!(
            validate_exp_at(now - 3600, DEFAULT_CLOCK_SKEW, now),
            Err(JwtValidationError::Expired)
        );
        // Within skew tolerance
        assert!(validate_exp_at(now - 30, Duration::from_secs(60), now).is_ok());
    }

    #[test]
    fn test_validate_nbf_boundaries() {
        let now = 1_700_000_000;
        assert!(validate_nbf_at(now, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert!(validate_nbf_at(now - 10, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert_eq!(
            validate_nbf_at(now + 1, DEFAULT_CLOCK_SKEW, now),
            Err(JwtValidationError::NotYetValid)
        );
        assert!(validate_nbf_at(now + 30, Duration::from_secs(60), now).is_ok());
    }

    #[test]
    fn test_fixed_clock() {
        assert_eq!(FixedClock(42).now_timestamp(), 42);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2023-11-14 as a sanity floor
        assert!(SystemClock.now_timestamp() > 1_700_000_000);
    }

    #[test]
    fn test_max_jwt_size_constant() {
        assert_eq!(
            MAX_JWT_SIZE_BYTES, 8192,
            "Max JWT size should be 8KB for DoS protection"
        );
    }
}
