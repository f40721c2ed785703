// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Two-stage token exchange
//!
//! [`ExchangeClient`] chains the two network exchanges of workload identity
//! federation:
//!
//! 1. **Stage A** ([`sts`]): the signed identity assertion is traded at the
//!    security token service for a federated token.
//! 2. **Stage B** ([`impersonation`]): the federated token, sent as bearer
//!    credential, is traded at the credentials API for an access token of
//!    the target service account.
//!
//! Stage B is only reachable with the federated token returned by a
//! successful stage A of the same run. Stage B permission-denied failures
//! are retried through [`retry::with_retry`]; everything else ends the
//! attempt.
//!
//! ```text
//! NotStarted ──A──▶ HaveFederatedToken ──B──▶ HaveAccessToken
//!      │                    │
//!      └────────────────────┴──────────▶ Failed
//! ```

pub mod impersonation;
pub mod retry;
pub mod sts;
pub mod token;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::assertion::IdentityAssertion;
use crate::clock::{Clock, SystemClock};
use crate::config::FederationConfig;
use crate::error::{FederationError, Stage};
use crate::utility::http;

pub use impersonation::ImpersonationClient;
pub use retry::{with_retry, Backoff, RetryPolicy};
pub use sts::{ProviderRef, StsClient};
pub use token::{AccessToken, ExpiryPolicy, ExpirySource, FederatedToken, TokenResponse};

/// Progress of one exchange run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    NotStarted,
    HaveFederatedToken,
    HaveAccessToken,
    Failed(Stage),
}

/// Both tokens produced by a successful run
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub federated: FederatedToken,
    pub access: AccessToken,
}

/// Orchestrates stage A then stage B
#[derive(Clone)]
pub struct ExchangeClient {
    sts: StsClient,
    impersonation: ImpersonationClient,
    audience: String,
    service_account_email: String,
    scopes: Vec<String>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("sts", &self.sts.endpoint().as_str())
            .field("audience", &self.audience)
            .field("service_account_email", &self.service_account_email)
            .field("scopes", &self.scopes)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ExchangeClient {
    pub fn new(
        sts: StsClient,
        impersonation: ImpersonationClient,
        provider: &ProviderRef,
        service_account_email: impl Into<String>,
        scopes: Vec<String>,
    ) -> Result<Self, FederationError> {
        provider.validate()?;
        Ok(Self {
            sts,
            impersonation,
            audience: provider.audience(),
            service_account_email: service_account_email.into(),
            scopes,
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Build both stage clients from the `federation` section
    pub fn from_config(config: &FederationConfig) -> Result<Self, FederationError> {
        let client = http::build_client(Duration::from_secs(config.request_timeout_seconds))?;
        let sts_endpoint = http::parse_endpoint("sts_endpoint", &config.sts_endpoint)?;
        let iam_endpoint =
            http::parse_endpoint("iam_credentials_endpoint", &config.iam_credentials_endpoint)?;
        let expiry = config.expiry_policy();

        let sts = StsClient::new(client.clone(), sts_endpoint).with_default_ttl(expiry.default_ttl);
        let impersonation = ImpersonationClient::new(client, iam_endpoint)
            .with_lifetime(config.lifetime_seconds.map(Duration::from_secs))
            .with_expiry_policy(expiry);

        Ok(Self::new(
            sts,
            impersonation,
            &config.provider_ref(),
            config.service_account_email.clone(),
            config.scopes.clone(),
        )?
        .with_retry_policy(config.retry_policy()))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the provider audience sent with stage A
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn service_account_email(&self) -> &str {
        &self.service_account_email
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    /// Stage A
    pub async fn exchange_assertion(
        &self,
        assertion: &IdentityAssertion,
    ) -> Result<FederatedToken, FederationError> {
        let now = self.clock.now();
        if assertion.is_expired_at(now) {
            warn!(
                "Presenting an assertion that expired at {}, expect a rejection",
                assertion.expires_at()
            );
        }
        let response = self
            .sts
            .exchange(assertion, &self.audience, &self.scope_string())
            .await?;
        FederatedToken::new(response, now)
    }

    /// Stage B, retried while authorization is still propagating
    ///
    /// Fails with [`FederationError::FederatedTokenExpired`] when the
    /// federated token runs out between attempts; the caller must then
    /// restart from a fresh assertion.
    pub async fn impersonate(
        &self,
        federated: &FederatedToken,
    ) -> Result<AccessToken, FederationError> {
        with_retry(
            &self.retry,
            Stage::Impersonation,
            FederationError::is_retryable,
            |attempt| async move {
                let now = self.clock.now();
                if federated.is_expired_at(now) {
                    return Err(FederationError::FederatedTokenExpired {
                        expired_at: federated.expires_at(),
                    });
                }
                debug!("generateAccessToken attempt {}", attempt);
                let response = self
                    .impersonation
                    .generate_access_token(federated, &self.service_account_email, &self.scopes, now)
                    .await?;
                AccessToken::new(response, now)
            },
        )
        .await
    }

    /// Stage A then stage B
    pub async fn exchange(
        &self,
        assertion: &IdentityAssertion,
    ) -> Result<ExchangeOutcome, FederationError> {
        let mut state = ExchangeState::NotStarted;
        debug!("Exchange state: {:?}", state);

        let federated = match self.exchange_assertion(assertion).await {
            Ok(token) => token,
            Err(e) => return Err(fail(state, Stage::Sts, e)),
        };
        state = ExchangeState::HaveFederatedToken;
        info!(
            "Obtained federated token (expires at {})",
            federated.expires_at()
        );

        let access = match self.impersonate(&federated).await {
            Ok(token) => token,
            Err(e) => return Err(fail(state, Stage::Impersonation, e)),
        };
        state = ExchangeState::HaveAccessToken;
        debug!("Exchange state: {:?}", state);
        info!(
            "Obtained access token for {} (expires at {})",
            self.service_account_email,
            access.expires_at()
        );

        Ok(ExchangeOutcome { federated, access })
    }

    /// [`exchange`](Self::exchange) abandoned as soon as `cancel` resolves
    ///
    /// A cancellation during stage A means stage B is never attempted.
    pub async fn exchange_until<C>(
        &self,
        assertion: &IdentityAssertion,
        cancel: C,
    ) -> Result<ExchangeOutcome, FederationError>
    where
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        let federated = tokio::select! {
            biased;
            _ = &mut cancel => return Err(FederationError::Cancelled { stage: Stage::Sts }),
            result = self.exchange_assertion(assertion) => result?,
        };

        let access = tokio::select! {
            biased;
            _ = &mut cancel => return Err(FederationError::Cancelled { stage: Stage::Impersonation }),
            result = self.impersonate(&federated) => result?,
        };

        Ok(ExchangeOutcome { federated, access })
    }
}

fn fail(from: ExchangeState, stage: Stage, error: FederationError) -> FederationError {
    debug!(
        "Exchange state: {:?} -> {:?}",
        from,
        ExchangeState::Failed(stage)
    );
    warn!("{} failed: {}", stage, error);
    error
}
