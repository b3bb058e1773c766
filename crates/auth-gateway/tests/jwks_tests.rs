//! Key cache tests against a mocked JWKS endpoint.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use auth_gateway::auth::{JwksCacheConfig, JwksClient, KeyCacheError};
use gateway_test_utils::{MockJwks, TestKeypair};
use serde_json::json;
use std::num::NonZeroU32;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const KID: &str = "test-key-01";

fn client(jwks: &MockJwks) -> JwksClient {
    JwksClient::with_config(JwksCacheConfig {
        requests_per_minute: None,
        ..JwksCacheConfig::new(jwks.jwks_url())
    })
}

#[tokio::test]
async fn test_resolve_caches_key() {
    let jwks = MockJwks::start().await;
    jwks.publish(&[&TestKeypair::primary(KID)]).await;
    let client = client(&jwks);

    let first = client.resolve(Some(KID)).await.unwrap();
    let second = client.resolve(Some(KID)).await.unwrap();

    assert_eq!(first.kid(), Some(KID));
    assert_eq!(second.kid(), Some(KID));
    assert_eq!(jwks.fetch_count().await, 1);
    assert_eq!(client.cached_key_count().await, 1);
}

#[tokio::test]
async fn test_resolve_fetches_document_once() {
    let jwks = MockJwks::start().await;
    Mock::given(method("GET"))
        .and(path(gateway_test_utils::JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(gateway_test_utils::jwks_json(&[&TestKeypair::primary(KID)])),
        )
        .expect(1)
        .mount(jwks.server())
        .await;
    let client = client(&jwks);

    for _ in 0..3 {
        client.resolve(Some(KID)).await.unwrap();
    }

    jwks.server().verify().await;
}

#[tokio::test]
async fn test_clear_cache_forces_refetch() {
    let jwks = MockJwks::start().await;
    jwks.publish(&[&TestKeypair::primary(KID)]).await;
    let client = client(&jwks);

    client.resolve(Some(KID)).await.unwrap();
    client.clear_cache().await;
    assert_eq!(client.cached_key_count().await, 0);

    client.resolve(Some(KID)).await.unwrap();
    assert_eq!(jwks.fetch_count().await, 2);
}

#[tokio::test]
async fn test_cache_disabled_fetches_every_time() {
    let jwks = MockJwks::start().await;
    jwks.publish(&[&TestKeypair::primary(KID)]).await;
    let client = JwksClient::with_config(JwksCacheConfig {
        cache_enabled: false,
        requests_per_minute: None,
        ..JwksCacheConfig::new(jwks.jwks_url())
    });

    client.resolve(Some(KID)).await.unwrap();
    client.resolve(Some(KID)).await.unwrap();

    assert_eq!(jwks.fetch_count().await, 2);
    assert_eq!(client.cached_key_count().await, 0);
}

#[tokio::test]
async fn test_ttl_expiry_refetches() {
    let jwks = MockJwks::start().await;
    jwks.publish(&[&TestKeypair::primary(KID)]).await;
    let client = JwksClient::with_config(JwksCacheConfig {
        cache_ttl: Some(Duration::from_millis(100)),
        requests_per_minute: None,
        ..JwksCacheConfig::new(jwks.jwks_url())
    });

    client.resolve(Some(KID)).await.unwrap();
    client.resolve(Some(KID)).await.unwrap();
    assert_eq!(jwks.fetch_count().await, 1);

    tokio::time::sleep(Duration::from_millis(200)).await;

    client.resolve(Some(KID)).await.unwrap();
    assert_eq!(jwks.fetch_count().await, 2);
}

#[tokio::test]
async fn test_concurrent_resolves_share_one_fetch() {
    let jwks = MockJwks::start().await;
    jwks.publish_with_delay(&[&TestKeypair::primary(KID)], Duration::from_millis(300))
        .await;
    let client = client(&jwks);

    let resolves = (0..20).map(|_| {
        let client = client.clone();
        async move { client.resolve(Some(KID)).await }
    });
    let results = futures::future::join_all(resolves).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(jwks.fetch_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_unknown_kid_shares_failure() {
    let jwks = MockJwks::start().await;
    jwks.publish_with_delay(&[&TestKeypair::primary(KID)], Duration::from_millis(300))
        .await;
    let client = client(&jwks);

    let resolves = (0..10).map(|_| {
        let client = client.clone();
        async move { client.resolve(Some("unknown")).await }
    });
    let results = futures::future::join_all(resolves).await;

    for result in results {
        assert_eq!(result.unwrap_err(), KeyCacheError::KeyNotFound);
    }
    assert_eq!(jwks.fetch_count().await, 1);
    assert_eq!(client.cached_key_count().await, 0);
}

#[tokio::test]
async fn test_distinct_kids_fetch_independently() {
    let jwks = MockJwks::start().await;
    jwks.publish(&[&TestKeypair::primary("k1"), &TestKeypair::secondary("k2")])
        .await;
    let client = client(&jwks);

    let (k1, k2) = tokio::join!(client.resolve(Some("k1")), client.resolve(Some("k2")));

    assert_eq!(k1.unwrap().kid(), Some("k1"));
    assert_eq!(k2.unwrap().kid(), Some("k2"));
    assert_eq!(jwks.fetch_count().await, 2);
    assert_eq!(client.cached_key_count().await, 2);
}

#[tokio::test]
async fn test_abandoned_fetch_still_populates_cache() {
    let jwks = MockJwks::start().await;
    jwks.publish_with_delay(&[&TestKeypair::primary(KID)], Duration::from_millis(200))
        .await;
    let client = client(&jwks);

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.resolve(Some(KID)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    waiter.abort();

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(client.cached_key_count().await, 1);
    client.resolve(Some(KID)).await.unwrap();
    assert_eq!(jwks.fetch_count().await, 1);
}

#[tokio::test]
async fn test_rate_limit_exceeded() {
    let jwks = MockJwks::start().await;
    jwks.publish(&[&TestKeypair::primary(KID)]).await;
    let client = JwksClient::with_config(JwksCacheConfig {
        requests_per_minute: NonZeroU32::new(2),
        ..JwksCacheConfig::new(jwks.jwks_url())
    });

    assert_eq!(
        client.resolve(Some("a")).await.unwrap_err(),
        KeyCacheError::KeyNotFound
    );
    assert_eq!(
        client.resolve(Some("b")).await.unwrap_err(),
        KeyCacheError::KeyNotFound
    );
    assert_eq!(
        client.resolve(Some("c")).await.unwrap_err(),
        KeyCacheError::FetchRateExceeded
    );
    assert_eq!(jwks.fetch_count().await, 2);
}

#[tokio::test]
async fn test_cache_hits_do_not_spend_budget() {
    let jwks = MockJwks::start().await;
    jwks.publish(&[&TestKeypair::primary(KID)]).await;
    let client = JwksClient::with_config(JwksCacheConfig {
        requests_per_minute: NonZeroU32::new(1),
        ..JwksCacheConfig::new(jwks.jwks_url())
    });

    for _ in 0..5 {
        client.resolve(Some(KID)).await.unwrap();
    }

    assert_eq!(jwks.fetch_count().await, 1);
}

#[tokio::test]
async fn test_server_error_is_transport_failure_and_not_cached() {
    let jwks = MockJwks::start().await;
    jwks.respond_with(ResponseTemplate::new(500)).await;
    let client = client(&jwks);

    let err = client.resolve(Some(KID)).await.unwrap_err();
    assert!(matches!(err, KeyCacheError::FetchTransport(_)));

    jwks.publish(&[&TestKeypair::primary(KID)]).await;
    client.resolve(Some(KID)).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    let client = JwksClient::with_config(JwksCacheConfig {
        requests_per_minute: None,
        ..JwksCacheConfig::new("http://127.0.0.1:1/.well-known/jwks.json")
    });

    let err = client.resolve(Some(KID)).await.unwrap_err();

    assert!(matches!(err, KeyCacheError::FetchTransport(_)));
}

#[tokio::test]
async fn test_fetch_timeout() {
    let jwks = MockJwks::start().await;
    jwks.publish_with_delay(&[&TestKeypair::primary(KID)], Duration::from_secs(3))
        .await;
    let client = JwksClient::with_config(JwksCacheConfig {
        fetch_timeout: Duration::from_millis(200),
        requests_per_minute: None,
        ..JwksCacheConfig::new(jwks.jwks_url())
    });

    let err = client.resolve(Some(KID)).await.unwrap_err();

    assert!(matches!(err, KeyCacheError::FetchTransport(_)));
}

#[tokio::test]
async fn test_invalid_json_is_malformed() {
    let jwks = MockJwks::start().await;
    jwks.respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .await;
    let client = client(&jwks);

    let err = client.resolve(Some(KID)).await.unwrap_err();

    assert!(matches!(err, KeyCacheError::FetchMalformed(_)));
}

#[tokio::test]
async fn test_non_rsa_key_is_malformed() {
    let jwks = MockJwks::start().await;
    jwks.publish_document(json!({
        "keys": [{
            "kty": "EC",
            "kid": KID,
            "crv": "P-256",
            "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
            "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0"
        }]
    }))
    .await;
    let client = client(&jwks);

    let err = client.resolve(Some(KID)).await.unwrap_err();

    assert!(matches!(err, KeyCacheError::FetchMalformed(_)));
}

#[tokio::test]
async fn test_encryption_keys_are_ignored() {
    let jwks = MockJwks::start().await;
    let mut jwk = TestKeypair::primary(KID).jwk_json();
    jwk["use"] = json!("enc");
    jwks.publish_document(json!({ "keys": [jwk] })).await;
    let client = client(&jwks);

    let err = client.resolve(Some(KID)).await.unwrap_err();

    assert_eq!(err, KeyCacheError::KeyNotFound);
}

#[tokio::test]
async fn test_kidless_resolve_uses_sole_key() {
    let jwks = MockJwks::start().await;
    jwks.publish(&[&TestKeypair::primary(KID).without_kid()])
        .await;
    let client = client(&jwks);

    let key = client.resolve(None).await.unwrap();

    assert_eq!(key.kid(), None);
}

#[tokio::test]
async fn test_kidless_resolve_with_several_keys_is_not_found() {
    let jwks = MockJwks::start().await;
    jwks.publish(&[&TestKeypair::primary("k1"), &TestKeypair::secondary("k2")])
        .await;
    let client = client(&jwks);

    let err = client.resolve(None).await.unwrap_err();

    assert_eq!(err, KeyCacheError::KeyNotFound);
}
