//! # Gateway Test Utilities
//!
//! Shared test utilities for the auth gateway.
//!
//! This crate provides:
//! - Fixed RSA keypairs and claim builders (`TestKeypair`, `TestClaims`)
//! - A wiremock JWKS endpoint (`MockJwks`)
//! - Server test harness (`TestGatewayServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gateway_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let keypair = TestKeypair::primary("test-key-01");
//!     let jwks = MockJwks::start().await;
//!     jwks.publish(&[&keypair]).await;
//!
//!     let server = TestGatewayServer::spawn(&jwks.jwks_url()).await?;
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/version", server.url()))
//!         .bearer_auth(keypair.sign_token(&TestClaims::valid()))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod jwks_mock;
pub mod keys;
pub mod server_harness;

// Re-export commonly used items
pub use jwks_mock::*;
pub use keys::*;
pub use server_harness::*;
