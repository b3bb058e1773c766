//! JWT validator tests with a pinned clock.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use auth_gateway::auth::{
    Audience, JwksCacheConfig, JwksClient, JwtValidator, KeyCacheError, VerifyError, VerifyPolicy,
};
use common::jwt::FixedClock;
use gateway_test_utils::{MockJwks, TestClaims, TestKeypair};
use jsonwebtoken::{Algorithm, Header};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const KID: &str = "test-key-01";
const NOW: i64 = 1_700_000_000;

fn claims_at(exp: Option<i64>, nbf: Option<i64>) -> TestClaims {
    TestClaims {
        exp,
        nbf,
        iat: NOW - 10,
        ..TestClaims::valid()
    }
}

async fn validator(policy: VerifyPolicy) -> (TestKeypair, MockJwks, JwtValidator) {
    let keypair = TestKeypair::primary(KID);
    let jwks = MockJwks::start().await;
    jwks.publish(&[&keypair]).await;
    let client = JwksClient::with_config(JwksCacheConfig {
        requests_per_minute: None,
        ..JwksCacheConfig::new(jwks.jwks_url())
    });
    let validator = JwtValidator::with_clock(client, policy, Arc::new(FixedClock(NOW)));
    (keypair, jwks, validator)
}

#[tokio::test]
async fn test_valid_token_yields_claims() {
    let (keypair, _jwks, validator) = validator(VerifyPolicy::default()).await;
    let mut claims = serde_json::to_value(claims_at(Some(NOW + 60), None)).unwrap();
    claims["scope"] = json!("relay:write");
    let token = keypair.sign_token(&claims);

    let verified = validator.validate(&token).await.unwrap();

    assert_eq!(verified.sub.as_deref(), Some("test-subject"));
    assert_eq!(verified.exp, Some(NOW + 60));
    assert_eq!(verified.iat, Some(NOW - 10));
    assert_eq!(verified.claim("scope"), Some(&json!("relay:write")));
}

#[tokio::test]
async fn test_exp_boundary() {
    let (keypair, _jwks, validator) = validator(VerifyPolicy::default()).await;

    let at_now = keypair.sign_token(&claims_at(Some(NOW), None));
    assert_eq!(
        validator.validate(&at_now).await.unwrap_err(),
        VerifyError::ClaimRejected("exp")
    );

    let one_second_left = keypair.sign_token(&claims_at(Some(NOW + 1), None));
    assert!(validator.validate(&one_second_left).await.is_ok());
}

#[tokio::test]
async fn test_clock_skew_tolerates_recent_expiry() {
    let policy = VerifyPolicy {
        clock_skew: Duration::from_secs(30),
        ..VerifyPolicy::default()
    };
    let (keypair, _jwks, validator) = validator(policy).await;

    let recently_expired = keypair.sign_token(&claims_at(Some(NOW - 10), None));
    assert!(validator.validate(&recently_expired).await.is_ok());

    let long_expired = keypair.sign_token(&claims_at(Some(NOW - 60), None));
    assert_eq!(
        validator.validate(&long_expired).await.unwrap_err(),
        VerifyError::ClaimRejected("exp")
    );
}

#[tokio::test]
async fn test_missing_exp_rejected() {
    let (keypair, _jwks, validator) = validator(VerifyPolicy::default()).await;
    let token = keypair.sign_token(&claims_at(None, None));

    assert_eq!(
        validator.validate(&token).await.unwrap_err(),
        VerifyError::ClaimRejected("exp")
    );
}

#[tokio::test]
async fn test_nbf_boundary() {
    let (keypair, _jwks, validator) = validator(VerifyPolicy::default()).await;

    let valid_from_now = keypair.sign_token(&claims_at(Some(NOW + 60), Some(NOW)));
    assert!(validator.validate(&valid_from_now).await.is_ok());

    let future = keypair.sign_token(&claims_at(Some(NOW + 60), Some(NOW + 1)));
    assert_eq!(
        validator.validate(&future).await.unwrap_err(),
        VerifyError::ClaimRejected("nbf")
    );
}

#[tokio::test]
async fn test_issuer_and_audience_policy() {
    let policy = VerifyPolicy {
        issuer: Some("https://issuer.example/".to_string()),
        audience: Some("relay".to_string()),
        ..VerifyPolicy::default()
    };
    let (keypair, _jwks, validator) = validator(policy).await;
    let base = claims_at(Some(NOW + 60), None);

    let good = keypair.sign_token(
        &base
            .clone()
            .with_issuer("https://issuer.example/")
            .with_audiences(&["other", "relay"]),
    );
    let verified = validator.validate(&good).await.unwrap();
    assert_eq!(
        verified.aud,
        Some(Audience::Many(vec!["other".to_string(), "relay".to_string()]))
    );

    let wrong_issuer = keypair.sign_token(
        &base
            .clone()
            .with_issuer("https://evil.example/")
            .with_audience("relay"),
    );
    assert_eq!(
        validator.validate(&wrong_issuer).await.unwrap_err(),
        VerifyError::ClaimRejected("iss")
    );

    let missing_audience = keypair.sign_token(&base.with_issuer("https://issuer.example/"));
    assert_eq!(
        validator.validate(&missing_audience).await.unwrap_err(),
        VerifyError::ClaimRejected("aud")
    );
}

#[tokio::test]
async fn test_unknown_kid_surfaces_key_error() {
    let (_keypair, jwks, validator) = validator(VerifyPolicy::default()).await;
    let token = TestKeypair::secondary("other").sign_token(&claims_at(Some(NOW + 60), None));

    assert_eq!(
        validator.validate(&token).await.unwrap_err(),
        VerifyError::UnknownSigningKey(KeyCacheError::KeyNotFound)
    );
    assert_eq!(jwks.fetch_count().await, 1);
}

#[tokio::test]
async fn test_signature_from_wrong_key_rejected() {
    let (_keypair, _jwks, validator) = validator(VerifyPolicy::default()).await;
    let token = TestKeypair::secondary(KID).sign_token(&claims_at(Some(NOW + 60), None));

    assert_eq!(
        validator.validate(&token).await.unwrap_err(),
        VerifyError::SignatureInvalid
    );
}

#[tokio::test]
async fn test_other_rsa_algorithms_rejected_before_key_lookup() {
    let (keypair, jwks, validator) = validator(VerifyPolicy::default()).await;
    let mut header = Header::new(Algorithm::RS512);
    header.kid = Some(KID.to_string());
    let token = keypair.sign_with_header(&header, &claims_at(Some(NOW + 60), None));

    assert_eq!(
        validator.validate(&token).await.unwrap_err(),
        VerifyError::AlgorithmNotAllowed("RS512".to_string())
    );
    assert_eq!(jwks.fetch_count().await, 0);
}

#[tokio::test]
async fn test_non_numeric_exp_is_malformed() {
    let (keypair, jwks, validator) = validator(VerifyPolicy::default()).await;
    let token = keypair.sign_token(&json!({ "sub": "test-subject", "exp": "tomorrow" }));

    assert_eq!(
        validator.validate(&token).await.unwrap_err(),
        VerifyError::MalformedToken
    );
    assert_eq!(jwks.fetch_count().await, 0);
}
