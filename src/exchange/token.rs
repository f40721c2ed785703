// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Token wire shapes and the canonical [`TokenResponse`]
//!
//! The security token service and the credentials API answer with different
//! JSON shapes. Each has an adapter here that normalizes it into one
//! [`TokenResponse`], so the exchange logic only ever sees a single shape.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{FederationError, Stage};

/// RFC 8693 grant type
pub const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
/// Subject token type of an identity assertion
pub const JWT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";
/// Requested token type for stage A
pub const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
/// The only token type both stages hand out
pub const BEARER: &str = "Bearer";
/// TTL used when the credentials API does not tell us better
pub const DEFAULT_TTL_SECONDS: i64 = 3600;
/// Longest lifetime either stage hands out (12 hours)
pub const MAX_TTL_SECONDS: i64 = 43_200;

/// Canonical token response shared by both exchange stages
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Security token service response (stage A)
#[derive(Debug, Deserialize)]
pub struct StsTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub issued_token_type: Option<String>,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Credentials API `generateAccessToken` response (stage B)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAccessTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expire_time: Option<String>,
}

/// How the stage B TTL is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExpirySource {
    /// Always use the configured default TTL
    #[default]
    Fixed,
    /// Compute the TTL from `expireTime`, falling back to the default
    ExpireTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub source: ExpirySource,
    pub default_ttl: Duration,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            source: ExpirySource::Fixed,
            default_ttl: Duration::seconds(DEFAULT_TTL_SECONDS),
        }
    }
}

impl ExpiryPolicy {
    fn ttl_seconds(&self, expire_time: Option<&str>, now: DateTime<Utc>) -> i64 {
        let default = self.default_ttl.num_seconds();
        if self.source == ExpirySource::Fixed {
            return default;
        }
        let Some(raw) = expire_time else {
            return default;
        };
        match DateTime::parse_from_rfc3339(raw) {
            Ok(at) => {
                let ttl = (at.with_timezone(&Utc) - now).num_seconds().max(0);
                if ttl > MAX_TTL_SECONDS {
                    warn!(
                        "expireTime '{}' is more than {}s away, capping the TTL",
                        raw, MAX_TTL_SECONDS
                    );
                }
                ttl.min(MAX_TTL_SECONDS)
            }
            Err(e) => {
                warn!(
                    "Unparseable expireTime '{}' ({}), using default TTL of {}s",
                    raw, e, default
                );
                default
            }
        }
    }
}

fn malformed(stage: Stage, reason: impl Into<String>, body: &str) -> FederationError {
    FederationError::MalformedResponse {
        stage,
        reason: reason.into(),
        body: body.to_string(),
    }
}

fn check_common(
    stage: Stage,
    access_token: &str,
    token_type: &str,
    body: &str,
) -> Result<(), FederationError> {
    if access_token.is_empty() {
        return Err(malformed(stage, "empty access token", body));
    }
    if !token_type.eq_ignore_ascii_case(BEARER) {
        return Err(malformed(
            stage,
            format!("unsupported token type '{}'", token_type),
            body,
        ));
    }
    Ok(())
}

/// Normalize a stage A response
///
/// `body` is only used for diagnostics.
pub fn from_sts_response(
    response: StsTokenResponse,
    default_ttl: Duration,
    body: &str,
) -> Result<TokenResponse, FederationError> {
    check_common(Stage::Sts, &response.access_token, &response.token_type, body)?;
    if let Some(issued) = response.issued_token_type.as_deref() {
        if issued != ACCESS_TOKEN_TYPE {
            warn!("STS issued unexpected token type '{}'", issued);
        }
    }
    let expires_in = response
        .expires_in
        .unwrap_or_else(|| default_ttl.num_seconds());
    // Zero is an already-expired token, which the pipeline restarts from
    if !(0..=MAX_TTL_SECONDS).contains(&expires_in) {
        return Err(malformed(
            Stage::Sts,
            format!(
                "expires_in {} outside 0..={}",
                expires_in, MAX_TTL_SECONDS
            ),
            body,
        ));
    }
    Ok(TokenResponse {
        access_token: response.access_token,
        token_type: BEARER.to_string(),
        expires_in,
    })
}

/// `obtained_at + expires_in`, or an error when chrono cannot represent it
fn expiry_instant(
    stage: Stage,
    obtained_at: DateTime<Utc>,
    expires_in: i64,
) -> Result<DateTime<Utc>, FederationError> {
    Duration::try_seconds(expires_in)
        .and_then(|ttl| obtained_at.checked_add_signed(ttl))
        .ok_or_else(|| FederationError::MalformedResponse {
            stage,
            reason: format!("expires_in {} is out of range", expires_in),
            body: String::new(),
        })
}

/// Normalize a stage B response, deriving `expires_in` through `policy`
pub fn from_generate_access_token_response(
    response: GenerateAccessTokenResponse,
    policy: &ExpiryPolicy,
    now: DateTime<Utc>,
    body: &str,
) -> Result<TokenResponse, FederationError> {
    check_common(Stage::Impersonation, &response.access_token, BEARER, body)?;
    let expires_in = policy.ttl_seconds(response.expire_time.as_deref(), now);
    Ok(TokenResponse {
        access_token: response.access_token,
        token_type: BEARER.to_string(),
        expires_in,
    })
}

/// Stage A output
///
/// Usable only as the bearer credential of stage B; it is never handed to
/// the resource client.
#[derive(Clone)]
pub struct FederatedToken {
    secret: String,
    expires_at: DateTime<Utc>,
}

impl FederatedToken {
    pub(crate) fn new(
        response: TokenResponse,
        obtained_at: DateTime<Utc>,
    ) -> Result<Self, FederationError> {
        Ok(Self {
            expires_at: expiry_instant(Stage::Sts, obtained_at, response.expires_in)?,
            secret: response.access_token,
        })
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for FederatedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederatedToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Stage B output: the impersonated access token
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    token_type: String,
    expires_in: i64,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Build from a normalized response received at `obtained_at`
    ///
    /// Fails when `expires_in` cannot be added to `obtained_at`.
    pub fn new(
        response: TokenResponse,
        obtained_at: DateTime<Utc>,
    ) -> Result<Self, FederationError> {
        Ok(Self {
            expires_at: expiry_instant(Stage::Impersonation, obtained_at, response.expires_in)?,
            secret: response.access_token,
            token_type: response.token_type,
            expires_in: response.expires_in,
        })
    }

    /// Wrap a bearer token obtained elsewhere, e.g. read back from disk
    pub fn from_bearer(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            token_type: BEARER.to_string(),
            expires_in: (expires_at - Utc::now()).num_seconds().max(0),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Lifetime reported at issuance
    pub fn expires_in(&self) -> i64 {
        self.expires_in
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Back to the canonical wire shape
    pub fn to_response(&self) -> TokenResponse {
        TokenResponse {
            access_token: self.secret.clone(),
            token_type: self.token_type.clone(),
            expires_in: self.expires_in,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
