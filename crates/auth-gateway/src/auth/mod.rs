//! Token authentication.
//!
//! - `jwks` - Signing key cache backed by the identity provider's JWKS endpoint
//! - `jwt` - Compact JWT verification (RS256 only)
//! - `claims` - Claims of a verified token

pub mod claims;
pub mod jwks;
pub mod jwt;

pub use claims::{Audience, VerifiedClaims};
pub use jwks::{JwksCacheConfig, JwksClient, KeyCacheError, SigningKey};
pub use jwt::{JwtValidator, VerifyError, VerifyPolicy};
