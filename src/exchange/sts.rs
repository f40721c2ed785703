// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Stage A: identity assertion → federated token
//!
//! A form-encoded RFC 8693 token exchange against the security token
//! service. The service validates the assertion (structure, expiry,
//! issuer and audience, signature if configured, attribute conditions);
//! this client only reacts to its verdict.

use chrono::Duration;
use log::{debug, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;
use url::Url;

use super::token::{
    from_sts_response, StsTokenResponse, TokenResponse, ACCESS_TOKEN_TYPE, JWT_TOKEN_TYPE,
    TOKEN_EXCHANGE_GRANT,
};
use crate::assertion::IdentityAssertion;
use crate::error::{FederationError, ProviderError, Stage};
use crate::utility::http::{self, FORM_CONTENT_TYPE};

/// Authority prefix of workload identity provider audiences
pub const DEFAULT_AUDIENCE_AUTHORITY: &str = "iam.googleapis.com";

/// Identifies the workload identity provider that trusts the assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRef {
    pub authority: String,
    pub project_number: String,
    pub pool_id: String,
    pub provider_id: String,
}

impl ProviderRef {
    pub fn new(
        project_number: impl Into<String>,
        pool_id: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            authority: DEFAULT_AUDIENCE_AUTHORITY.to_string(),
            project_number: project_number.into(),
            pool_id: pool_id.into(),
            provider_id: provider_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), FederationError> {
        for (field, value) in [
            ("audience_authority", &self.authority),
            ("project_number", &self.project_number),
            ("pool_id", &self.pool_id),
            ("provider_id", &self.provider_id),
        ] {
            if value.trim().is_empty() || value.contains('/') {
                return Err(FederationError::validation(
                    field,
                    format!("'{}' is not a valid identifier", value),
                ));
            }
        }
        Ok(())
    }

    /// Fully-qualified audience sent with stage A
    pub fn audience(&self) -> String {
        format!(
            "//{}/projects/{}/locations/global/workloadIdentityPools/{}/providers/{}",
            self.authority, self.project_number, self.pool_id, self.provider_id
        )
    }
}

#[derive(Serialize)]
struct TokenExchangeRequest<'a> {
    grant_type: &'a str,
    audience: &'a str,
    scope: &'a str,
    requested_token_type: &'a str,
    subject_token: &'a str,
    subject_token_type: &'a str,
}

/// Client for the security token service token endpoint
#[derive(Debug, Clone)]
pub struct StsClient {
    http: reqwest::Client,
    endpoint: Url,
    default_ttl: Duration,
}

impl StsClient {
    pub fn new(http: reqwest::Client, endpoint: Url) -> Self {
        Self {
            http,
            endpoint,
            default_ttl: Duration::seconds(super::token::DEFAULT_TTL_SECONDS),
        }
    }

    /// TTL assumed when the service omits `expires_in`
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Exchange `assertion` for a federated token
    ///
    /// Rejections are never retried here; a rejected assertion has to be
    /// re-issued before another attempt makes sense.
    pub async fn exchange(
        &self,
        assertion: &IdentityAssertion,
        audience: &str,
        scope: &str,
    ) -> Result<TokenResponse, FederationError> {
        if audience.trim().is_empty() {
            return Err(FederationError::validation("audience", "must not be empty"));
        }
        if scope.trim().is_empty() {
            return Err(FederationError::validation("scope", "must not be empty"));
        }

        let form = serde_urlencoded::to_string(TokenExchangeRequest {
            grant_type: TOKEN_EXCHANGE_GRANT,
            audience,
            scope,
            requested_token_type: ACCESS_TOKEN_TYPE,
            subject_token: assertion.as_str(),
            subject_token_type: JWT_TOKEN_TYPE,
        })
        .map_err(|e| FederationError::validation("token exchange request", e.to_string()))?;

        debug!("Requesting federated token from {} for {}", self.endpoint, audience);
        let request = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(form);
        let (status, body) = http::send(Stage::Sts, request).await?;

        if !status.is_success() {
            return Err(classify_failure(status, body));
        }

        let response: StsTokenResponse = http::parse_json(Stage::Sts, &body)?;
        from_sts_response(response, self.default_ttl, &body)
    }
}

fn classify_failure(status: StatusCode, body: String) -> FederationError {
    let detail = ProviderError::parse(&body)
        .map(|e| e.to_string())
        .unwrap_or_else(|| body.clone());
    warn!("STS token exchange failed with HTTP {}: {}", status.as_u16(), detail);

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FederationError::AssertionRejected {
                stage: Stage::Sts,
                status: status.as_u16(),
                body,
            }
        }
        _ => FederationError::Protocol {
            stage: Stage::Sts,
            status: status.as_u16(),
            body,
        },
    }
}
