// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error taxonomy for the federation flow
//!
//! Every failure of the key → assertion → exchange → resource chain is
//! reported as a [`FederationError`]. Network-derived variants carry the
//! [`Stage`] that failed, the HTTP status and the raw provider body so a
//! failing request can be reproduced from the diagnostics alone.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// The network hop an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Stage A: identity assertion → federated token (security token service)
    Sts,
    /// Stage B: federated token → impersonated access token (credentials API)
    Impersonation,
    /// Call to the protected resource API with the final access token
    Resource,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Sts => write!(f, "STS token exchange"),
            Stage::Impersonation => write!(f, "service account impersonation"),
            Stage::Resource => write!(f, "resource API call"),
        }
    }
}

/// Errors raised while building, exchanging or using federated credentials
#[derive(Error, Debug)]
pub enum FederationError {
    /// A required claim or parameter is missing or malformed. Raised before
    /// any network call and never retried.
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Key generation, key decoding or signing failed.
    #[error("Cryptographic operation failed: {reason}")]
    Crypto { reason: String },

    /// The endpoint could not be reached or the response could not be read.
    #[error("{stage} failed at transport level: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: reqwest::Error,
    },

    /// The federation service refused the identity assertion (bad issuer,
    /// audience, signature or expiry). A new assertion is required.
    #[error("{stage} rejected the identity assertion (HTTP {status}): {body}")]
    AssertionRejected {
        stage: Stage,
        status: u16,
        body: String,
    },

    /// Permission denied on impersonation. Common right after an IAM binding
    /// is created, while authorization propagates on the provider side.
    #[error("{stage} denied permission, authorization may still be propagating (HTTP {status}): {body}")]
    AuthorizationPending {
        stage: Stage,
        status: u16,
        body: String,
    },

    /// The access token is valid but lacks permission on the resource.
    #[error("{stage} denied access (HTTP {status}): {body}")]
    ResourceAccessDenied {
        stage: Stage,
        status: u16,
        body: String,
    },

    /// Any other non-success status returned by a provider endpoint.
    #[error("{stage} returned HTTP {status}: {body}")]
    Protocol {
        stage: Stage,
        status: u16,
        body: String,
    },

    /// A success status whose body does not have the documented shape.
    #[error("{stage} returned a malformed response ({reason}): {body}")]
    MalformedResponse {
        stage: Stage,
        reason: String,
        body: String,
    },

    /// A cached token was consumed past its safety margin.
    #[error("Cached access token expired at {expired_at}")]
    TokenExpired { expired_at: DateTime<Utc> },

    /// The federated token expired while stage B was still being retried.
    #[error("Federated token expired at {expired_at} before impersonation succeeded")]
    FederatedTokenExpired { expired_at: DateTime<Utc> },

    /// A retryable failure persisted past the configured attempt cap.
    #[error("{stage} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        stage: Stage,
        attempts: u32,
        #[source]
        last: Box<FederationError>,
    },

    /// The caller cancelled the exchange while the stage was in flight.
    #[error("{stage} cancelled before completion")]
    Cancelled { stage: Stage },
}

impl FederationError {
    /// Shorthand for a [`FederationError::Validation`]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        FederationError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`FederationError::Crypto`]
    pub fn crypto(reason: impl fmt::Display) -> Self {
        FederationError::Crypto {
            reason: reason.to_string(),
        }
    }

    /// Only authorization propagation delays are worth retrying; everything
    /// else is terminal for the current exchange attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FederationError::AuthorizationPending { .. })
    }

    /// The stage a network-derived error came from, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            FederationError::Transport { stage, .. }
            | FederationError::AssertionRejected { stage, .. }
            | FederationError::AuthorizationPending { stage, .. }
            | FederationError::ResourceAccessDenied { stage, .. }
            | FederationError::Protocol { stage, .. }
            | FederationError::MalformedResponse { stage, .. }
            | FederationError::RetriesExhausted { stage, .. }
            | FederationError::Cancelled { stage } => Some(*stage),
            FederationError::FederatedTokenExpired { .. } => Some(Stage::Impersonation),
            _ => None,
        }
    }

    /// HTTP status reported by the provider, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            FederationError::AssertionRejected { status, .. }
            | FederationError::AuthorizationPending { status, .. }
            | FederationError::ResourceAccessDenied { status, .. }
            | FederationError::Protocol { status, .. } => Some(*status),
            FederationError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            FederationError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Raw provider body, if any
    pub fn provider_body(&self) -> Option<&str> {
        match self {
            FederationError::AssertionRejected { body, .. }
            | FederationError::AuthorizationPending { body, .. }
            | FederationError::ResourceAccessDenied { body, .. }
            | FederationError::Protocol { body, .. }
            | FederationError::MalformedResponse { body, .. } => Some(body),
            FederationError::RetriesExhausted { last, .. } => last.provider_body(),
            _ => None,
        }
    }

    /// Process exit code used by the `wif` binary
    pub fn exit_code(&self) -> i32 {
        match self {
            FederationError::Validation { .. } => 2,
            FederationError::Crypto { .. } => 3,
            FederationError::Transport { .. } => 4,
            FederationError::AssertionRejected { .. } => 5,
            FederationError::AuthorizationPending { .. } => 6,
            FederationError::ResourceAccessDenied { .. } => 7,
            FederationError::Protocol { .. } => 8,
            FederationError::MalformedResponse { .. } => 9,
            FederationError::TokenExpired { .. } => 10,
            FederationError::FederatedTokenExpired { .. } => 11,
            FederationError::RetriesExhausted { last, .. } => last.exit_code(),
            FederationError::Cancelled { .. } => 12,
        }
    }
}

/// Structured view of a provider error payload
///
/// Token endpoints answer with the OAuth shape
/// `{"error": "invalid_grant", "error_description": "..."}` while the
/// credentials and resource APIs use
/// `{"error": {"code": 403, "message": "...", "status": "PERMISSION_DENIED"}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// `invalid_grant`, `PERMISSION_DENIED`, ...
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawProviderError {
    OAuth {
        error: String,
        error_description: Option<String>,
    },
    Google {
        error: GoogleErrorDetail,
    },
}

#[derive(Deserialize)]
struct GoogleErrorDetail {
    message: Option<String>,
    status: Option<String>,
}

impl ProviderError {
    /// Best-effort parse; `None` when the body is not one of the known shapes.
    pub fn parse(body: &str) -> Option<Self> {
        match serde_json::from_str::<RawProviderError>(body).ok()? {
            RawProviderError::OAuth {
                error,
                error_description,
            } => Some(ProviderError {
                code: Some(error),
                message: error_description,
            }),
            RawProviderError::Google { error } => Some(ProviderError {
                code: error.status,
                message: error.message,
            }),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.code.as_deref() == Some("PERMISSION_DENIED")
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => write!(f, "{}: {}", code, message),
            (Some(code), None) => write!(f, "{}", code),
            (None, Some(message)) => write!(f, "{}", message),
            (None, None) => write!(f, "unknown provider error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_oauth_error_body() {
        let body = r#"{"error":"invalid_grant","error_description":"The audience in ID Token does not match"}"#;
        let parsed = ProviderError::parse(body).unwrap();
        assert_eq!(parsed.code.as_deref(), Some("invalid_grant"));
        assert!(parsed.message.unwrap().contains("audience"));
    }

    #[test]
    fn parses_google_error_body() {
        let body = r#"{"error":{"code":403,"message":"Permission 'iam.serviceAccounts.getAccessToken' denied","status":"PERMISSION_DENIED"}}"#;
        let parsed = ProviderError::parse(body).unwrap();
        assert!(parsed.is_permission_denied());
        assert_eq!(parsed.to_string().split(':').next(), Some("PERMISSION_DENIED"));
    }

    #[test]
    fn unknown_bodies_are_not_parsed() {
        assert!(ProviderError::parse("upstream connect error").is_none());
        assert!(ProviderError::parse(r#"{"message":"nope"}"#).is_none());
    }

    #[test]
    fn only_authorization_pending_is_retryable() {
        let pending = FederationError::AuthorizationPending {
            stage: Stage::Impersonation,
            status: 403,
            body: String::new(),
        };
        let rejected = FederationError::AssertionRejected {
            stage: Stage::Sts,
            status: 400,
            body: String::new(),
        };
        assert!(pending.is_retryable());
        assert!(!rejected.is_retryable());
        assert!(!FederationError::validation("subject", "empty").is_retryable());
    }

    #[test]
    fn exhausted_retries_report_the_last_failure() {
        let err = FederationError::RetriesExhausted {
            stage: Stage::Impersonation,
            attempts: 30,
            last: Box::new(FederationError::AuthorizationPending {
                stage: Stage::Impersonation,
                status: 403,
                body: "denied".to_string(),
            }),
        };
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.provider_body(), Some("denied"));
        assert_eq!(err.exit_code(), 6);
        assert_eq!(err.stage(), Some(Stage::Impersonation));
    }
}
