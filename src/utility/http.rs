// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! HTTP plumbing shared by the exchange and resource clients

use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{FederationError, Stage};

/// `User-Agent` sent with every request
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Media type of the stage A request body
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Build the client used for all three round trips
///
/// `timeout` bounds each request, connection included.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, FederationError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| FederationError::validation("http client", e.to_string()))
}

/// Parse and check an absolute http(s) endpoint
pub fn parse_endpoint(field: &str, raw: &str) -> Result<Url, FederationError> {
    let url = Url::parse(raw)
        .map_err(|e| FederationError::validation(field, format!("'{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FederationError::validation(
            field,
            format!("unsupported scheme '{}' in '{}'", other, raw),
        )),
    }
}

/// Append `path` below the path of `base`, keeping any existing prefix
pub fn join_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url
}

/// Send a prepared request and read the whole response
///
/// Connection, timeout and body read failures become
/// [`FederationError::Transport`] for `stage`.
pub async fn send(
    stage: Stage,
    request: reqwest::RequestBuilder,
) -> Result<(reqwest::StatusCode, String), FederationError> {
    let response = request
        .send()
        .await
        .map_err(|source| FederationError::Transport { stage, source })?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| FederationError::Transport { stage, source })?;
    debug!("{} answered HTTP {} ({} bytes)", stage, status.as_u16(), body.len());
    Ok((status, body))
}

/// Decode a success body, reporting shape mismatches as malformed
pub fn parse_json<T: DeserializeOwned>(stage: Stage, body: &str) -> Result<T, FederationError> {
    serde_json::from_str(body).map_err(|e| FederationError::MalformedResponse {
        stage,
        reason: e.to_string(),
        body: body.to_string(),
    })
}
