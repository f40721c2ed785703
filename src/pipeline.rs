// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Full derivation chain: signing key → assertion → stage A → stage B
//!
//! Every derivation mints a new assertion. When the federated token runs
//! out while stage B is still being retried, the chain restarts from a new
//! assertion up to `max_chain_restarts` times.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};

use crate::assertion::AssertionBuilder;
use crate::cache::TokenSource;
use crate::config::Config;
use crate::error::FederationError;
use crate::exchange::{AccessToken, ExchangeClient, ExchangeOutcome};
use crate::keys::SigningKeyPair;

#[derive(Debug, Clone)]
pub struct FederationPipeline {
    builder: AssertionBuilder,
    exchange: ExchangeClient,
    max_chain_restarts: u32,
}

impl FederationPipeline {
    pub fn new(builder: AssertionBuilder, exchange: ExchangeClient) -> Self {
        Self {
            builder,
            exchange,
            max_chain_restarts: 1,
        }
    }

    /// Wire the pipeline from configuration around an already loaded key
    ///
    /// The key id defaults to the key's RFC 7638 thumbprint.
    pub fn from_config(config: &Config, key: Arc<SigningKeyPair>) -> Result<Self, FederationError> {
        let key_id = match &config.identity.key_id {
            Some(kid) => kid.clone(),
            None => key.thumbprint()?,
        };
        let claims = config.identity.claim_set();
        claims.validate()?;

        let builder =
            AssertionBuilder::new(key, key_id, claims).with_validity(config.identity.validity()?);
        let exchange = ExchangeClient::from_config(&config.federation)?;

        Ok(Self::new(builder, exchange)
            .with_max_chain_restarts(config.federation.max_chain_restarts))
    }

    pub fn with_max_chain_restarts(mut self, restarts: u32) -> Self {
        self.max_chain_restarts = restarts;
        self
    }

    pub fn builder(&self) -> &AssertionBuilder {
        &self.builder
    }

    pub fn exchange_client(&self) -> &ExchangeClient {
        &self.exchange
    }

    /// Run the whole chain once, restarting on federated token expiry
    pub async fn derive(&self) -> Result<ExchangeOutcome, FederationError> {
        let mut restarts = 0;
        loop {
            let assertion = self.builder.sign()?;
            info!(
                "Signed assertion for {} (kid {}), exchanging",
                assertion.claims().sub,
                self.builder.key_id()
            );

            match self.exchange.exchange(&assertion).await {
                Err(FederationError::FederatedTokenExpired { expired_at })
                    if restarts < self.max_chain_restarts =>
                {
                    restarts += 1;
                    warn!(
                        "Federated token expired at {} during impersonation, restarting chain ({}/{})",
                        expired_at, restarts, self.max_chain_restarts
                    );
                }
                result => return result,
            }
        }
    }

    /// [`derive`](Self::derive) once, abandoned when `cancel` resolves
    pub async fn derive_until<C>(&self, cancel: C) -> Result<ExchangeOutcome, FederationError>
    where
        C: Future<Output = ()>,
    {
        let assertion = self.builder.sign()?;
        self.exchange.exchange_until(&assertion, cancel).await
    }
}

#[async_trait]
impl TokenSource for FederationPipeline {
    async fn fetch_token(&self) -> Result<AccessToken, FederationError> {
        self.derive().await.map(|outcome| outcome.access)
    }
}
