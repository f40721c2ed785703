// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Resource listing against a mock Pub/Sub style API

mod common;

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wif_exchange::exchange::AccessToken;
use wif_exchange::resource::{ResourceClient, ResourceRef};
use wif_exchange::{FederationError, Stage};

fn token() -> AccessToken {
    AccessToken::from_bearer("acc-xyz", Utc::now() + chrono::Duration::hours(1))
}

async fn client(server: &MockServer) -> ResourceClient {
    let config = common::config_for(&server.uri());
    ResourceClient::from_config(&config.resource, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_pages_are_followed() -> Result<()> {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/p/topics"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "topics": [{ "name": "projects/p/topics/t3" }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/p/topics"))
        .and(header("authorization", "Bearer acc-xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "topics": [
                { "name": "projects/p/topics/t1" },
                { "name": "projects/p/topics/t2", "labels": { "team": "data" } }
            ],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let list = client(&server)
        .await
        .call(&token(), &ResourceRef::for_project("p", "topics"))
        .await?;

    assert_eq!(
        list.names().collect::<Vec<_>>(),
        vec![
            "projects/p/topics/t1",
            "projects/p/topics/t2",
            "projects/p/topics/t3"
        ]
    );
    assert!(list.is_complete());
    assert_eq!(list.items[1].extra["labels"]["team"], "data");
    Ok(())
}

#[tokio::test]
async fn test_page_limit_stops_listing() -> Result<()> {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/p/topics"))
        .and(query_param("pageSize", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "topics": [{ "name": "projects/p/topics/again" }],
            "nextPageToken": "more"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let list = client(&server)
        .await
        .with_page_size(Some(1))
        .with_max_pages(2)
        .call(&token(), &ResourceRef::for_project("p", "topics"))
        .await?;

    assert_eq!(list.len(), 2);
    assert!(!list.is_complete());
    assert_eq!(list.next_page_token.as_deref(), Some("more"));
    Ok(())
}

#[tokio::test]
async fn test_empty_collection_is_success() -> Result<()> {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/p/topics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let list = client(&server)
        .await
        .call(&token(), &ResourceRef::for_project("p", "topics"))
        .await?;
    assert!(list.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_forbidden_is_resource_access_denied() {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/p/topics"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "code": 403,
                "message": "User not authorized to perform this action.",
                "status": "PERMISSION_DENIED"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .call(&token(), &ResourceRef::for_project("p", "topics"))
        .await
        .unwrap_err();

    match &err {
        FederationError::ResourceAccessDenied { stage, status, body } => {
            assert_eq!(*stage, Stage::Resource);
            assert_eq!(*status, 403);
            assert!(body.contains("not authorized"));
        }
        other => panic!("expected ResourceAccessDenied, got {:?}", other),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_server_errors_are_protocol_errors() {
    common::setup();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/p/subscriptions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend error"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .call(&token(), &ResourceRef::for_project("p", "subscriptions"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FederationError::Protocol {
            stage: Stage::Resource,
            status: 500,
            ..
        }
    ));
}
