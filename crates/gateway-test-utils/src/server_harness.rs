//! Test server harness for E2E testing
//!
//! Provides `TestGatewayServer` for spawning real gateway instances in tests.

use auth_gateway::config::Config;
use auth_gateway::handlers::{relay_router, RelayState};
use auth_gateway::routes::{self, GatewayState};
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the gateway in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_relay_flow_e2e() -> Result<()> {
///     let jwks = MockJwks::start().await;
///     let server = TestGatewayServer::spawn(&jwks.jwks_url()).await?;
///     let client = reqwest::Client::new();
///
///     let response = client
///         .get(format!("{}/version", server.url()))
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 401);
///     Ok(())
/// }
/// ```
pub struct TestGatewayServer {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    _handle: JoinHandle<()>,
}

impl TestGatewayServer {
    /// Spawn a gateway in front of the relay with default configuration.
    ///
    /// # Arguments
    /// * `jwks_url` - JWKS endpoint (typically `MockJwks::jwks_url()`)
    pub async fn spawn(jwks_url: &str) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(jwks_url, &[]).await
    }

    /// Spawn a gateway in front of the relay with extra environment settings.
    ///
    /// # Arguments
    /// * `jwks_url` - JWKS endpoint
    /// * `vars` - Additional configuration variables (e.g. `JWT_ISSUER`)
    pub async fn spawn_with_vars(
        jwks_url: &str,
        vars: &[(&str, &str)],
    ) -> Result<Self, anyhow::Error> {
        let mut all_vars = HashMap::from([
            ("JWKS_URI".to_string(), jwks_url.to_string()),
            ("BIND_HOST".to_string(), "127.0.0.1".to_string()),
            ("HTTP_PORT".to_string(), "0".to_string()),
        ]);
        all_vars.extend(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())));

        let config = Config::from_vars(&all_vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let state = GatewayState::from_config(&config)
            .map_err(|e| anyhow::anyhow!("Failed to build gateway state: {}", e))?;

        Self::spawn_with_router(state, relay_router(Arc::new(RelayState::new()))).await
    }

    /// Spawn a gateway with explicit state in front of `downstream`.
    pub async fn spawn_with_router(
        state: GatewayState,
        downstream: Router,
    ) -> Result<Self, anyhow::Error> {
        let state = Arc::new(state);

        // Build routes using the gateway's real route builder
        let app = routes::build_routes(Arc::clone(&state), downstream);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the gateway state the server runs with.
    pub fn state(&self) -> &GatewayState {
        &self.state
    }
}

impl Drop for TestGatewayServer {
    fn drop(&mut self) {
        // Explicitly abort the HTTP server task to ensure immediate cleanup
        // when the test completes.
        self._handle.abort();
    }
}
