// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Two-stage exchange against a mock security token service and
//! credentials API

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{config_for, GENERATE_ACCESS_TOKEN_PATH};
use wif_exchange::exchange::{ExchangeClient, RetryPolicy, TokenResponse};
use wif_exchange::resource::{ResourceClient, ResourceRef};
use wif_exchange::{FederationError, FederationPipeline, Stage};

fn sts_success(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": token,
        "issued_token_type": "urn:ietf:params:oauth:token-type:access_token",
        "token_type": "Bearer",
        "expires_in": 3600
    }))
}

fn generate_success(token: &str) -> ResponseTemplate {
    let expire_time = (Utc::now() + chrono::Duration::hours(1))
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    ResponseTemplate::new(200).set_body_json(json!({
        "accessToken": token,
        "expireTime": expire_time
    }))
}

fn permission_denied() -> ResponseTemplate {
    ResponseTemplate::new(403).set_body_json(json!({
        "error": {
            "code": 403,
            "message": "Permission 'iam.serviceAccounts.getAccessToken' denied on resource (or it may not exist).",
            "status": "PERMISSION_DENIED"
        }
    }))
}

fn pipeline(server: &MockServer) -> FederationPipeline {
    FederationPipeline::from_config(&config_for(&server.uri()), common::signing_key()).unwrap()
}

#[tokio::test]
async fn test_end_to_end_federation_flow() -> Result<()> {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Atoken-exchange",
        ))
        .and(body_string_contains(
            "audience=%2F%2Fiam.googleapis.com%2Fprojects%2F123456%2Flocations%2Fglobal%2FworkloadIdentityPools%2Fpool%2Fproviders%2Fprovider",
        ))
        .and(body_string_contains(
            "subject_token_type=urn%3Aietf%3Aparams%3Aoauth%3Atoken-type%3Ajwt",
        ))
        .respond_with(sts_success("fed-abc"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(GENERATE_ACCESS_TOKEN_PATH))
        .and(header("authorization", "Bearer fed-abc"))
        .and(body_json(json!({
            "scope": ["https://www.googleapis.com/auth/cloud-platform"]
        })))
        .respond_with(generate_success("acc-xyz"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/p/topics"))
        .and(header("authorization", "Bearer acc-xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "topics": [{ "name": "projects/p/topics/t1" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server.uri());
    let outcome = pipeline(&server).derive().await?;

    assert_eq!(outcome.federated.secret(), "fed-abc");
    assert_eq!(
        outcome.access.to_response(),
        TokenResponse {
            access_token: "acc-xyz".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 3600,
        }
    );

    let resources = ResourceClient::from_config(&config.resource, Duration::from_secs(5))?
        .call(&outcome.access, &ResourceRef::from_config(&config.resource))
        .await?;
    assert_eq!(resources.len(), 1);
    assert_eq!(
        resources.names().collect::<Vec<_>>(),
        vec!["projects/p/topics/t1"]
    );

    Ok(())
}

#[tokio::test]
async fn test_stage_b_uses_the_stage_a_token() -> Result<()> {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(sts_success("fed-from-this-run"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_ACCESS_TOKEN_PATH))
        .respond_with(generate_success("acc-1"))
        .mount(&server)
        .await;

    pipeline(&server).derive().await?;

    let requests = server.received_requests().await.unwrap_or_default();
    let stage_b: Vec<_> = requests
        .iter()
        .filter(|r| r.url.path() == GENERATE_ACCESS_TOKEN_PATH)
        .collect();
    assert_eq!(stage_b.len(), 1);
    assert_eq!(
        stage_b[0]
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok()),
        Some("Bearer fed-from-this-run")
    );
    Ok(())
}

#[tokio::test]
async fn test_rejected_assertion_stops_before_stage_b() {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .and(body_string_contains("audience=wrong-audience"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "The audience in ID Token [gcp-workload-identity] does not match the expected audience."
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_ACCESS_TOKEN_PATH))
        .respond_with(generate_success("never"))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = config_for(&server.uri());
    config.identity.audience = "gcp-workload-identity".to_string();
    let pipeline =
        FederationPipeline::from_config(&config, common::signing_key()).unwrap();
    let client = pipeline.exchange_client().clone().with_audience("wrong-audience");
    let assertion = pipeline.builder().sign().unwrap();

    let err = client.exchange(&assertion).await.unwrap_err();
    match &err {
        FederationError::AssertionRejected { stage, status, body } => {
            assert_eq!(*stage, Stage::Sts);
            assert_eq!(*status, 400);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("expected AssertionRejected, got {:?}", other),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_permission_denied_is_retried_until_success() -> Result<()> {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(sts_success("fed-abc"))
        .expect(1)
        .mount(&server)
        .await;
    // Mounted first, so it answers the first two attempts
    Mock::given(method("POST"))
        .and(path(GENERATE_ACCESS_TOKEN_PATH))
        .respond_with(permission_denied())
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_ACCESS_TOKEN_PATH))
        .respond_with(generate_success("acc-xyz"))
        .mount(&server)
        .await;

    let interval = Duration::from_millis(100);
    let client = ExchangeClient::from_config(&config_for(&server.uri()).federation)?
        .with_retry_policy(RetryPolicy::fixed(30, interval));
    let assertion = pipeline(&server).builder().sign()?;

    let started = Instant::now();
    let outcome = client.exchange(&assertion).await?;
    let elapsed = started.elapsed();

    assert_eq!(outcome.access.secret(), "acc-xyz");
    let stage_b_requests = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == GENERATE_ACCESS_TOKEN_PATH)
        .count();
    assert_eq!(stage_b_requests, 3);
    assert!(elapsed >= interval * 2, "retried too fast: {:?}", elapsed);
    Ok(())
}

#[tokio::test]
async fn test_persistent_permission_denied_exhausts_retries() {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(sts_success("fed-abc"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_ACCESS_TOKEN_PATH))
        .respond_with(permission_denied())
        .expect(4)
        .mount(&server)
        .await;

    let client = ExchangeClient::from_config(&config_for(&server.uri()).federation)
        .unwrap()
        .with_retry_policy(RetryPolicy::fixed(4, Duration::ZERO));
    let assertion = pipeline(&server).builder().sign().unwrap();

    let err = client.exchange(&assertion).await.unwrap_err();
    match &err {
        FederationError::RetriesExhausted {
            stage,
            attempts,
            last,
        } => {
            assert_eq!(*stage, Stage::Impersonation);
            assert_eq!(*attempts, 4);
            assert!(matches!(
                **last,
                FederationError::AuthorizationPending { status: 403, .. }
            ));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(err.status(), Some(403));
}

#[tokio::test]
async fn test_other_stage_b_failures_are_not_retried() {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(sts_success("fed-abc"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_ACCESS_TOKEN_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string("service account not found"))
        .expect(1)
        .mount(&server)
        .await;

    let err = pipeline(&server).derive().await.unwrap_err();
    assert!(matches!(
        err,
        FederationError::Protocol {
            stage: Stage::Impersonation,
            status: 404,
            ..
        }
    ));
    assert_eq!(err.provider_body(), Some("service account not found"));
}

#[tokio::test]
async fn test_malformed_sts_response_is_reported() {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy login</html>"))
        .mount(&server)
        .await;

    let err = pipeline(&server).derive().await.unwrap_err();
    assert!(matches!(
        err,
        FederationError::MalformedResponse {
            stage: Stage::Sts,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unbounded_sts_lifetime_is_rejected() {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fed-forever",
            "token_type": "Bearer",
            "expires_in": i64::MAX
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_ACCESS_TOKEN_PATH))
        .respond_with(generate_success("acc-xyz"))
        .expect(0)
        .mount(&server)
        .await;

    let err = pipeline(&server).derive().await.unwrap_err();
    assert!(matches!(
        err,
        FederationError::MalformedResponse {
            stage: Stage::Sts,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cancelled_stage_a_never_reaches_stage_b() {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(sts_success("fed-abc").set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_ACCESS_TOKEN_PATH))
        .respond_with(generate_success("acc-xyz"))
        .expect(0)
        .mount(&server)
        .await;

    let err = pipeline(&server)
        .derive_until(tokio::time::sleep(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::Cancelled { stage: Stage::Sts }));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_transport_error() {
    common::setup();
    // Nothing listens on port 1
    let err = FederationPipeline::from_config(&config_for("http://127.0.0.1:1"), common::signing_key())
        .unwrap()
        .derive()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FederationError::Transport {
            stage: Stage::Sts,
            ..
        }
    ));
}

#[tokio::test]
async fn test_expired_federated_token_restarts_the_chain() -> Result<()> {
    common::setup();
    let server = MockServer::start().await;

    // A federated token that is already expired when stage B starts
    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fed-short",
            "token_type": "Bearer",
            "expires_in": 0
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(sts_success("fed-long"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_ACCESS_TOKEN_PATH))
        .and(header("authorization", "Bearer fed-long"))
        .respond_with(generate_success("acc-xyz"))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = pipeline(&server).derive().await?;
    assert_eq!(outcome.federated.secret(), "fed-long");
    assert_eq!(outcome.access.secret(), "acc-xyz");

    let sts_requests = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/v1/token")
        .count();
    assert_eq!(sts_requests, 2);
    Ok(())
}

#[tokio::test]
async fn test_expired_federated_token_without_restarts_fails() {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fed-short",
            "token_type": "Bearer",
            "expires_in": 0
        })))
        .mount(&server)
        .await;

    let pipeline = pipeline(&server).with_max_chain_restarts(0);
    let err = pipeline.derive().await.unwrap_err();
    assert!(matches!(err, FederationError::FederatedTokenExpired { .. }));
    assert_eq!(err.stage(), Some(Stage::Impersonation));
}

#[tokio::test]
async fn test_requested_lifetime_is_sent() -> Result<()> {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(sts_success("fed-abc"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_ACCESS_TOKEN_PATH))
        .and(body_json(json!({
            "scope": ["https://www.googleapis.com/auth/pubsub"],
            "lifetime": "1800s"
        })))
        .respond_with(generate_success("acc-short"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server.uri());
    config.federation.scopes = vec!["https://www.googleapis.com/auth/pubsub".to_string()];
    config.federation.lifetime_seconds = Some(1800);

    let outcome = FederationPipeline::from_config(&config, common::signing_key())?
        .derive()
        .await?;
    assert_eq!(outcome.access.secret(), "acc-short");
    Ok(())
}

#[tokio::test]
async fn test_expire_time_policy_derives_ttl() -> Result<()> {
    common::setup();
    let server = MockServer::start().await;

    let expire_time = (Utc::now() + chrono::Duration::minutes(20))
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(sts_success("fed-abc"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_ACCESS_TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "acc-xyz",
            "expireTime": expire_time
        })))
        .mount(&server)
        .await;

    let mut config = config_for(&server.uri());
    config.federation.expiry.policy = wif_exchange::exchange::ExpirySource::ExpireTime;

    let clock = Arc::new(common::ManualClock::new(Utc::now()));
    let client = ExchangeClient::from_config(&config.federation)?.with_clock(clock);
    let assertion = pipeline(&server).builder().sign()?;
    let outcome = client.exchange(&assertion).await?;

    let ttl = outcome.access.expires_in();
    assert!((1195..=1200).contains(&ttl), "unexpected ttl {}", ttl);
    Ok(())
}
