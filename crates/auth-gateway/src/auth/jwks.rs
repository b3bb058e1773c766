//! JWKS key cache for resolving token signing keys.
//!
//! The cache resolves a key ID against the identity provider's JWKS endpoint
//! and remembers the result for subsequent requests.
//!
//! # Guarantees
//!
//! - At most one fetch is in flight per key ID. Concurrent misses for the same
//!   key ID wait on the leader's fetch and receive its result, success or error.
//! - Fetch attempts are bounded by a token-bucket budget shared by all misses.
//!   A miss that would exceed the budget fails without touching the network.
//! - Every fetch is bounded by a timeout, so a hung endpoint cannot pin a
//!   key ID's in-flight slot.
//! - Fetches run as detached tasks: a key is cached even if every request
//!   waiting on it has gone away.
//! - Failures are never cached. The next request for the key ID fetches again
//!   (subject to the rate limit).
//!
//! Cached keys do not expire unless a TTL is configured. Identity providers
//! keep retired keys published for a grace period, so a stale entry can only
//! verify tokens the provider itself still considers valid.

use crate::observability::metrics;
use futures::future::{BoxFuture, FutureExt, Shared};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default JWKS fetch timeout (10 seconds).
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default fetch budget (5 per minute).
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 5;

/// The only key type this gateway can verify with.
const RSA_KEY_TYPE: &str = "RSA";

/// The only algorithm an RSA key may be published for.
const RSA_KEY_ALGORITHM: &str = "RS256";

/// Errors from signing key resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyCacheError {
    /// The JWKS document has no usable signing key for the requested key ID.
    #[error("Signing key not found")]
    KeyNotFound,

    /// The fetch budget is exhausted; no request was made.
    #[error("JWKS fetch rate limit exceeded")]
    FetchRateExceeded,

    /// The JWKS endpoint could not be reached or returned an error status.
    #[error("JWKS fetch failed: {0}")]
    FetchTransport(String),

    /// The JWKS document or the matching key could not be used.
    #[error("JWKS response malformed: {0}")]
    FetchMalformed(String),
}

/// JSON Web Key from the JWKS endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (only "RSA" is usable).
    #[serde(default)]
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm the key is intended for.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use ("sig" for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,
}

impl Jwk {
    /// Whether the key may be used to verify signatures.
    fn is_signing_key(&self) -> bool {
        self.key_use.as_deref().map_or(true, |u| u == "sig")
    }

    fn is_rsa(&self) -> bool {
        self.kty == RSA_KEY_TYPE
    }

    /// Convert to a verification key.
    ///
    /// # Errors
    ///
    /// Returns `KeyCacheError::FetchMalformed` for non-RSA keys, RSA keys
    /// published for another algorithm, and missing or undecodable `n`/`e`.
    pub fn to_signing_key(&self) -> Result<SigningKey, KeyCacheError> {
        if !self.is_rsa() {
            tracing::warn!(target: "gateway.auth.jwks", kty = %self.kty, "Unsupported JWK key type");
            return Err(KeyCacheError::FetchMalformed(format!(
                "unsupported key type '{}'",
                self.kty
            )));
        }
        if let Some(alg) = &self.alg {
            if alg != RSA_KEY_ALGORITHM {
                tracing::warn!(target: "gateway.auth.jwks", alg = %alg, "Unexpected JWK algorithm");
                return Err(KeyCacheError::FetchMalformed(format!(
                    "unsupported key algorithm '{}'",
                    alg
                )));
            }
        }

        let (Some(n), Some(e)) = (self.n.as_deref(), self.e.as_deref()) else {
            return Err(KeyCacheError::FetchMalformed(
                "RSA key missing 'n' or 'e'".to_string(),
            ));
        };

        let decoding_key = DecodingKey::from_rsa_components(n, e).map_err(|err| {
            tracing::warn!(target: "gateway.auth.jwks", error = %err, "Invalid RSA key components");
            KeyCacheError::FetchMalformed(format!("invalid RSA key: {}", err))
        })?;

        Ok(SigningKey {
            kid: self.kid.clone(),
            decoding_key,
        })
    }
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    /// List of JSON Web Keys.
    pub keys: Vec<Jwk>,
}

impl JwksResponse {
    /// Select the key a token should be verified with.
    ///
    /// With a key ID, the signing key carrying that ID. Without one, the only
    /// RSA signing key in the set; a set with zero or several candidates is
    /// ambiguous and yields `KeyNotFound`.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` when no key matches, or `FetchMalformed` if the
    /// matching key is unusable.
    pub fn select(&self, kid: Option<&str>) -> Result<SigningKey, KeyCacheError> {
        let mut signing = self.keys.iter().filter(|k| k.is_signing_key());

        let jwk = match kid {
            Some(kid) => signing.find(|k| k.kid.as_deref() == Some(kid)),
            None => {
                let mut rsa = signing.filter(|k| k.is_rsa());
                match (rsa.next(), rsa.next()) {
                    (Some(only), None) => Some(only),
                    _ => None,
                }
            }
        };

        jwk.ok_or(KeyCacheError::KeyNotFound)?.to_signing_key()
    }
}

/// A resolved verification key.
#[derive(Clone)]
pub struct SigningKey {
    kid: Option<String>,
    decoding_key: DecodingKey,
}

impl SigningKey {
    /// Key ID as published, if any.
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// The RSA public key.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// Key cache settings.
#[derive(Debug, Clone)]
pub struct JwksCacheConfig {
    /// URL of the JWKS endpoint.
    pub jwks_url: String,

    /// When false every resolve fetches (concurrent fetches are still shared).
    pub cache_enabled: bool,

    /// Optional entry lifetime; `None` keeps entries for the process lifetime.
    pub cache_ttl: Option<Duration>,

    /// Fetch budget; `None` disables rate limiting.
    pub requests_per_minute: Option<NonZeroU32>,

    /// Upper bound on a single fetch.
    pub fetch_timeout: Duration,
}

impl JwksCacheConfig {
    /// Defaults: cache on, no TTL, 5 fetches per minute, 10 second timeout.
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            cache_enabled: true,
            cache_ttl: None,
            requests_per_minute: NonZeroU32::new(DEFAULT_REQUESTS_PER_MINUTE),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// Cache slot: the requested key ID, or `None` for kid-less tokens.
type Slot = Option<String>;

type FetchResult = Result<SigningKey, KeyCacheError>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct CacheEntry {
    key: SigningKey,
    fetched_at: Instant,
}

struct Inner {
    jwks_url: String,
    http_client: reqwest::Client,
    cache_enabled: bool,
    cache_ttl: Option<Duration>,
    fetch_timeout: Duration,
    keys: RwLock<HashMap<Slot, CacheEntry>>,
    in_flight: Mutex<HashMap<Slot, SharedFetch>>,
    rate_limiter: Option<DefaultDirectRateLimiter>,
}

/// JWKS client with key caching, per-key fetch de-duplication and a fetch
/// rate limit.
///
/// Cheap to clone; clones share the cache, the in-flight table and the budget.
#[derive(Clone)]
pub struct JwksClient {
    inner: Arc<Inner>,
}

impl JwksClient {
    /// Create a client with default settings.
    ///
    /// # Arguments
    ///
    /// * `jwks_url` - URL of the identity provider's JWKS endpoint
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self::with_config(JwksCacheConfig::new(jwks_url))
    }

    /// Create a client with explicit settings.
    pub fn with_config(config: JwksCacheConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gateway.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        let rate_limiter = config
            .requests_per_minute
            .map(|rpm| RateLimiter::direct(Quota::per_minute(rpm)));

        Self {
            inner: Arc::new(Inner {
                jwks_url: config.jwks_url,
                http_client,
                cache_enabled: config.cache_enabled,
                cache_ttl: config.cache_ttl,
                fetch_timeout: config.fetch_timeout,
                keys: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                rate_limiter,
            }),
        }
    }

    /// URL of the JWKS endpoint.
    pub fn jwks_url(&self) -> &str {
        &self.inner.jwks_url
    }

    /// Resolve the signing key for a token's key ID.
    ///
    /// # Arguments
    ///
    /// * `kid` - Key ID from the token header; `None` selects the sole key
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound`, `FetchRateExceeded`, `FetchTransport` or
    /// `FetchMalformed`.
    #[instrument(skip_all, fields(kid = ?kid))]
    pub async fn resolve(&self, kid: Option<&str>) -> Result<SigningKey, KeyCacheError> {
        let slot: Slot = kid.map(ToString::to_string);

        if let Some(key) = self.cached(&slot).await {
            tracing::debug!(target: "gateway.auth.jwks", "JWKS cache hit");
            metrics::record_jwks_cache_lookup("hit");
            return Ok(key);
        }

        let fetch = {
            let mut in_flight = self.inner.in_flight.lock().await;

            if let Some(existing) = in_flight.get(&slot) {
                tracing::debug!(target: "gateway.auth.jwks", "Joining in-flight JWKS fetch");
                metrics::record_jwks_cache_lookup("joined");
                existing.clone()
            } else {
                // A leader may have finished between the cache read and the lock.
                if let Some(key) = self.cached(&slot).await {
                    metrics::record_jwks_cache_lookup("hit");
                    return Ok(key);
                }

                metrics::record_jwks_cache_lookup("miss");
                self.check_rate_limit()?;

                let fetch = self.spawn_fetch(slot.clone());
                in_flight.insert(slot, fetch.clone());
                fetch
            }
        };

        fetch.await
    }

    /// Number of cached keys.
    pub async fn cached_key_count(&self) -> usize {
        self.inner.keys.read().await.len()
    }

    /// Drop all cached keys.
    pub async fn clear_cache(&self) {
        self.inner.keys.write().await.clear();
    }

    async fn cached(&self, slot: &Slot) -> Option<SigningKey> {
        if !self.inner.cache_enabled {
            return None;
        }

        let keys = self.inner.keys.read().await;
        let entry = keys.get(slot)?;

        if let Some(ttl) = self.inner.cache_ttl {
            if entry.fetched_at.elapsed() >= ttl {
                tracing::debug!(target: "gateway.auth.jwks", "Cached JWKS key expired");
                return None;
            }
        }

        Some(entry.key.clone())
    }

    fn check_rate_limit(&self) -> Result<(), KeyCacheError> {
        match &self.inner.rate_limiter {
            Some(limiter) if limiter.check().is_err() => {
                tracing::warn!(target: "gateway.auth.jwks", "JWKS fetch rate limit exceeded");
                metrics::record_jwks_fetch("rate_limited", Duration::ZERO);
                Err(KeyCacheError::FetchRateExceeded)
            }
            _ => Ok(()),
        }
    }

    /// Start a detached fetch for `slot` and return a handle all waiters share.
    ///
    /// Must be called with the in-flight lock held, so the task's own removal
    /// of the slot cannot run before the slot has been registered.
    fn spawn_fetch(&self, slot: Slot) -> SharedFetch {
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let result = inner.fetch_key(slot.as_deref()).await;

            if let Ok(key) = &result {
                if inner.cache_enabled {
                    inner.keys.write().await.insert(
                        slot.clone(),
                        CacheEntry {
                            key: key.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                }
            }

            inner.in_flight.lock().await.remove(&slot);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                tracing::error!(target: "gateway.auth.jwks", error = %e, "JWKS fetch task failed");
                Err(KeyCacheError::FetchTransport(
                    "fetch task did not complete".to_string(),
                ))
            })
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    /// Fetch the JWKS document and select the key for `kid`.
    #[instrument(skip_all, fields(url = %self.jwks_url, kid = ?kid))]
    async fn fetch_key(&self, kid: Option<&str>) -> FetchResult {
        let start = Instant::now();

        let result = match tokio::time::timeout(self.fetch_timeout, self.fetch_document()).await {
            Ok(document) => document.and_then(|jwks| jwks.select(kid)),
            Err(_) => {
                tracing::error!(target: "gateway.auth.jwks", "JWKS fetch timed out");
                Err(KeyCacheError::FetchTransport("timed out".to_string()))
            }
        };

        let status = match &result {
            Ok(_) => "success",
            Err(KeyCacheError::KeyNotFound) => "key_not_found",
            Err(KeyCacheError::FetchMalformed(_)) => "malformed",
            Err(_) => "transport_error",
        };
        metrics::record_jwks_fetch(status, start.elapsed());

        match &result {
            Ok(_) => tracing::info!(target: "gateway.auth.jwks", "Signing key fetched"),
            Err(KeyCacheError::KeyNotFound) => {
                tracing::warn!(target: "gateway.auth.jwks", "Key not found in JWKS");
            }
            Err(_) => {}
        }

        result
    }

    async fn fetch_document(&self) -> Result<JwksResponse, KeyCacheError> {
        tracing::debug!(target: "gateway.auth.jwks", "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "gateway.auth.jwks", error = %e, "Failed to fetch JWKS");
                KeyCacheError::FetchTransport(e.to_string())
            })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "gateway.auth.jwks",
                status = %response.status(),
                "JWKS endpoint returned error"
            );
            return Err(KeyCacheError::FetchTransport(format!(
                "status {}",
                response.status()
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            tracing::error!(target: "gateway.auth.jwks", error = %e, "Failed to read JWKS response");
            KeyCacheError::FetchTransport(e.to_string())
        })?;

        serde_json::from_slice::<JwksResponse>(&body).map_err(|e| {
            tracing::error!(target: "gateway.auth.jwks", error = %e, "Failed to parse JWKS response");
            KeyCacheError::FetchMalformed(e.to_string())
        })
    }
}
