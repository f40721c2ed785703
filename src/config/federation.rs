// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Token exchange configuration
//!
//! This module defines the settings of both exchange stages: which
//! workload identity provider receives the assertion, which service account
//! is impersonated, the endpoints, and the stage B retry and expiry policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exchange::impersonation::DEFAULT_IAM_CREDENTIALS_ENDPOINT;
use crate::exchange::retry::{DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS};
use crate::exchange::sts::DEFAULT_AUDIENCE_AUTHORITY;
use crate::exchange::token::DEFAULT_TTL_SECONDS;
use crate::exchange::{Backoff, ExpiryPolicy, ExpirySource, ProviderRef, RetryPolicy};

/// Default security token service endpoint
pub const DEFAULT_STS_ENDPOINT: &str = "https://sts.googleapis.com/v1/token";
/// Default OAuth scope requested at both stages
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
/// Upper bound of exponential backoff when none is configured
pub const DEFAULT_MAX_INTERVAL_SECONDS: u64 = 120;

/// How stage B access token lifetimes are derived.
///
/// `policy: fixed` always uses `default_ttl_seconds`; `policy: expire_time`
/// computes the lifetime from the `expireTime` of the response and only
/// falls back to the default when it is missing or unparseable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    pub policy: ExpirySource,
    pub default_ttl_seconds: i64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            policy: ExpirySource::Fixed,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }
}

/// Retry of stage B while a new IAM binding propagates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, first one included (default: 30)
    pub max_attempts: u32,
    /// Delay after the first failure (default: 10)
    pub interval_seconds: u64,
    pub backoff: Backoff,
    /// Cap for exponential backoff
    pub max_interval_seconds: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval_seconds: DEFAULT_INTERVAL.as_secs(),
            backoff: Backoff::Fixed,
            max_interval_seconds: None,
        }
    }
}

/// Configuration of the two-stage exchange.
///
/// # Fields
///
/// * `project_number` - Numeric id of the project hosting the pool
/// * `pool_id` / `provider_id` - Workload identity pool and provider
/// * `service_account_email` - Service account to impersonate
/// * `scopes` - OAuth scopes (default: cloud-platform)
/// * `sts_endpoint` - Token exchange endpoint
/// * `iam_credentials_endpoint` - Base URL of the credentials API
/// * `audience_authority` - Authority prefix of the provider audience
/// * `request_timeout_seconds` - Per request timeout (default: 30)
/// * `lifetime_seconds` - Requested access token lifetime, service default when unset
/// * `expiry` - Access token lifetime derivation
/// * `retry` - Stage B retry policy
/// * `max_chain_restarts` - Full restarts allowed when the federated token expires during stage B
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub project_number: String,
    pub pool_id: String,
    pub provider_id: String,
    pub service_account_email: String,
    pub scopes: Vec<String>,
    pub sts_endpoint: String,
    pub iam_credentials_endpoint: String,
    pub audience_authority: String,
    pub request_timeout_seconds: u64,
    pub lifetime_seconds: Option<u64>,
    pub expiry: ExpiryConfig,
    pub retry: RetryConfig,
    pub max_chain_restarts: u32,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            project_number: "123456789012".to_string(),
            pool_id: "my-pool".to_string(),
            provider_id: "my-provider".to_string(),
            service_account_email: "wif-runner@my-project.iam.gserviceaccount.com".to_string(),
            scopes: vec![DEFAULT_SCOPE.to_string()],
            sts_endpoint: DEFAULT_STS_ENDPOINT.to_string(),
            iam_credentials_endpoint: DEFAULT_IAM_CREDENTIALS_ENDPOINT.to_string(),
            audience_authority: DEFAULT_AUDIENCE_AUTHORITY.to_string(),
            request_timeout_seconds: 30,
            lifetime_seconds: None,
            expiry: ExpiryConfig::default(),
            retry: RetryConfig::default(),
            max_chain_restarts: 1,
        }
    }
}

impl FederationConfig {
    pub fn provider_ref(&self) -> ProviderRef {
        ProviderRef {
            authority: self.audience_authority.clone(),
            project_number: self.project_number.clone(),
            pool_id: self.pool_id.clone(),
            provider_id: self.provider_id.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let interval = Duration::from_secs(self.retry.interval_seconds);
        match self.retry.backoff {
            Backoff::Fixed => RetryPolicy::fixed(self.retry.max_attempts, interval),
            Backoff::Exponential => RetryPolicy::exponential(
                self.retry.max_attempts,
                interval,
                Duration::from_secs(
                    self.retry
                        .max_interval_seconds
                        .unwrap_or(DEFAULT_MAX_INTERVAL_SECONDS),
                ),
            ),
        }
    }

    pub fn expiry_policy(&self) -> ExpiryPolicy {
        ExpiryPolicy {
            source: self.expiry.policy,
            default_ttl: chrono::Duration::try_seconds(self.expiry.default_ttl_seconds)
                .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_TTL_SECONDS)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_section_maps_to_policy() {
        let mut config = FederationConfig::default();
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::fixed(30, Duration::from_secs(10))
        );

        config.retry.backoff = Backoff::Exponential;
        config.retry.interval_seconds = 2;
        let policy = config.retry_policy();
        assert_eq!(policy.backoff, Backoff::Exponential);
        assert_eq!(policy.max_interval, Duration::from_secs(DEFAULT_MAX_INTERVAL_SECONDS));
    }

    #[test]
    fn provider_audience_uses_configured_authority() {
        let config = FederationConfig {
            audience_authority: "iam.example.test".to_string(),
            ..Default::default()
        };
        assert!(config
            .provider_ref()
            .audience()
            .starts_with("//iam.example.test/projects/123456789012/"));
    }
}
