//! Middleware for the auth gateway.
//!
//! # Components
//!
//! - `auth` - Admission: preflight, bearer extraction, token verification
//! - `cors` - CORS header derivation and the response adapter

pub mod auth;
pub mod cors;

pub use auth::{extract_bearer_token, require_auth, ClaimsExt};
pub use cors::{CorsContext, CorsPolicy, CorsResponseAdapter};
