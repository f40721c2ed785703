// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Stage B: federated token → impersonated access token
//!
//! Calls `generateAccessToken` on the credentials API for the target
//! service account, authenticated with the federated token from stage A.
//! Permission-denied answers are reported as
//! [`FederationError::AuthorizationPending`] so the caller can retry while
//! a fresh IAM binding propagates.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::StatusCode;
use serde::Serialize;
use url::Url;

use super::token::{
    from_generate_access_token_response, ExpiryPolicy, FederatedToken,
    GenerateAccessTokenResponse, TokenResponse,
};
use crate::error::{FederationError, ProviderError, Stage};
use crate::utility::http;

/// Default base URL of the credentials API
pub const DEFAULT_IAM_CREDENTIALS_ENDPOINT: &str = "https://iamcredentials.googleapis.com";

#[derive(Serialize, Debug, PartialEq)]
struct GenerateAccessTokenRequest<'a> {
    scope: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    lifetime: Option<String>,
}

/// Client for the `generateAccessToken` method
#[derive(Debug, Clone)]
pub struct ImpersonationClient {
    http: reqwest::Client,
    base: Url,
    lifetime: Option<Duration>,
    expiry: ExpiryPolicy,
}

impl ImpersonationClient {
    pub fn new(http: reqwest::Client, base: Url) -> Self {
        Self {
            http,
            base,
            lifetime: None,
            expiry: ExpiryPolicy::default(),
        }
    }

    /// Request an explicit token lifetime instead of the service default
    pub fn with_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_expiry_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.expiry = policy;
        self
    }

    /// `{base}/v1/projects/-/serviceAccounts/{email}:generateAccessToken`
    pub fn endpoint_for(&self, service_account_email: &str) -> Url {
        http::join_path(
            &self.base,
            &format!(
                "v1/projects/-/serviceAccounts/{}:generateAccessToken",
                service_account_email
            ),
        )
    }

    /// One `generateAccessToken` attempt
    ///
    /// `now` is the instant used to derive `expires_in` from `expireTime`.
    pub async fn generate_access_token(
        &self,
        federated: &FederatedToken,
        service_account_email: &str,
        scopes: &[String],
        now: DateTime<Utc>,
    ) -> Result<TokenResponse, FederationError> {
        if !service_account_email.contains('@') {
            return Err(FederationError::validation(
                "service_account_email",
                format!("'{}' is not an email address", service_account_email),
            ));
        }
        if scopes.is_empty() || scopes.iter().any(|s| s.trim().is_empty()) {
            return Err(FederationError::validation("scopes", "at least one non-empty scope is required"));
        }

        let endpoint = self.endpoint_for(service_account_email);
        let body = GenerateAccessTokenRequest {
            scope: scopes,
            lifetime: self.lifetime.map(|l| format!("{}s", l.as_secs())),
        };

        debug!("Requesting access token for {} from {}", service_account_email, endpoint);
        let request = self
            .http
            .post(endpoint)
            .bearer_auth(federated.secret())
            .json(&body);
        let (status, body) = http::send(Stage::Impersonation, request).await?;

        if !status.is_success() {
            return Err(classify_failure(status, body));
        }

        let response: GenerateAccessTokenResponse = http::parse_json(Stage::Impersonation, &body)?;
        from_generate_access_token_response(response, &self.expiry, now, &body)
    }
}

fn classify_failure(status: StatusCode, body: String) -> FederationError {
    let provider = ProviderError::parse(&body);
    let denied = status == StatusCode::FORBIDDEN
        || provider.as_ref().is_some_and(ProviderError::is_permission_denied);

    if denied {
        return FederationError::AuthorizationPending {
            stage: Stage::Impersonation,
            status: status.as_u16(),
            body,
        };
    }

    warn!(
        "generateAccessToken failed with HTTP {}: {}",
        status.as_u16(),
        provider.map(|p| p.to_string()).unwrap_or_else(|| body.clone())
    );
    FederationError::Protocol {
        stage: Stage::Impersonation,
        status: status.as_u16(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ImpersonationClient {
        ImpersonationClient::new(
            reqwest::Client::new(),
            Url::parse(DEFAULT_IAM_CREDENTIALS_ENDPOINT).unwrap(),
        )
    }

    #[test]
    fn endpoint_names_the_service_account() {
        assert_eq!(
            client().endpoint_for("runner@proj.iam.gserviceaccount.com").as_str(),
            "https://iamcredentials.googleapis.com/v1/projects/-/serviceAccounts/runner@proj.iam.gserviceaccount.com:generateAccessToken"
        );
    }

    #[test]
    fn lifetime_is_optional_in_the_body() {
        let scopes = vec!["https://www.googleapis.com/auth/cloud-platform".to_string()];
        let without = serde_json::to_value(GenerateAccessTokenRequest {
            scope: &scopes,
            lifetime: None,
        })
        .unwrap();
        assert_eq!(
            without,
            serde_json::json!({"scope": ["https://www.googleapis.com/auth/cloud-platform"]})
        );

        let with = serde_json::to_value(GenerateAccessTokenRequest {
            scope: &scopes,
            lifetime: Some("1800s".to_string()),
        })
        .unwrap();
        assert_eq!(with["lifetime"], "1800s");
    }

    #[test]
    fn permission_denied_is_retryable() {
        let forbidden = classify_failure(StatusCode::FORBIDDEN, "{}".to_string());
        assert!(forbidden.is_retryable());

        let by_status_field = classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"code":400,"message":"denied","status":"PERMISSION_DENIED"}}"#.to_string(),
        );
        assert!(by_status_field.is_retryable());

        let not_found = classify_failure(StatusCode::NOT_FOUND, "no such account".to_string());
        assert!(matches!(not_found, FederationError::Protocol { status: 404, .. }));
    }
}
