//! Mock JWKS endpoint on wiremock.

use crate::keys::{jwks_json, TestKeypair};
use serde_json::Value;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock serves the JWKS document on.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// A JWKS endpoint whose document and fetch count tests control.
///
/// # Example
/// ```rust,ignore
/// let jwks = MockJwks::start().await;
/// jwks.publish(&[&TestKeypair::primary("k1")]).await;
/// // ... drive the gateway ...
/// assert_eq!(jwks.fetch_count().await, 1);
/// ```
pub struct MockJwks {
    server: MockServer,
}

impl MockJwks {
    /// Start a mock server with nothing mounted (every fetch gets 404).
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Full URL of the JWKS document.
    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Serve a document publishing `keypairs`.
    pub async fn publish(&self, keypairs: &[&TestKeypair]) {
        self.respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(keypairs)))
            .await;
    }

    /// Serve a document publishing `keypairs`, answering each fetch after `delay`.
    pub async fn publish_with_delay(&self, keypairs: &[&TestKeypair], delay: Duration) {
        self.respond_with(
            ResponseTemplate::new(200)
                .set_body_json(jwks_json(keypairs))
                .set_delay(delay),
        )
        .await;
    }

    /// Serve an arbitrary JSON document.
    pub async fn publish_document(&self, document: Value) {
        self.respond_with(ResponseTemplate::new(200).set_body_json(document))
            .await;
    }

    /// Replace whatever is mounted with `template`.
    pub async fn respond_with(&self, template: ResponseTemplate) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    /// Number of JWKS requests received so far.
    pub async fn fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|r| r.url.path() == JWKS_PATH)
                    .count()
            })
            .unwrap_or(0)
    }

    /// The underlying wiremock server.
    pub fn server(&self) -> &MockServer {
        &self.server
    }
}
