//! JWT claims structure.
//!
//! Contains the claims extracted from verified JWTs. The `sub` field is
//! redacted in Debug output to prevent exposure in logs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The `aud` claim: a single audience or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    /// Whether `audience` is one of the token's audiences.
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::One(aud) => aud == audience,
            Audience::Many(auds) => auds.iter().any(|a| a == audience),
        }
    }
}

/// Payload of a token that passed verification.
///
/// Registered claims the gateway checks are typed; everything else the issuer
/// put in the token is kept in `extra`.
#[derive(Clone, Serialize, Deserialize)]
pub struct VerifiedClaims {
    /// Subject - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Audience.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Expiration timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Not-before timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Remaining claims, verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl fmt::Debug for VerifiedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedClaims")
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("nbf", &self.nbf)
            .field("iat", &self.iat)
            .field("extra_claims", &self.extra.len())
            .finish()
    }
}

impl VerifiedClaims {
    /// Look up a claim that has no typed field.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}
