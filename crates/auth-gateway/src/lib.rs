//! Auth Gateway Library
//!
//! An authenticating HTTP gateway. It admits only requests carrying a JWT
//! signed by a trusted identity provider, whose public keys are published
//! through a JWKS endpoint, and hands admitted requests to a downstream
//! router unchanged.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/auth.rs -> auth/jwt.rs -> auth/jwks.rs
//!                                  \-> middleware/cors.rs
//!                                  \-> downstream (handlers/relay.rs by default)
//! ```
//!
//! # Modules
//!
//! - `auth` - JWKS key cache, JWT verification, verified claims
//! - `config` - Service configuration from environment
//! - `errors` - Client-facing error kinds and their 401/500 responses
//! - `handlers` - The streaming relay served behind the gateway
//! - `middleware` - Admission and CORS
//! - `observability` - Metrics
//! - `routes` - Gateway state and router layering

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
