// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Credential cache
//!
//! Hands out the cached access token while it is still fresh, i.e. while
//! `now < expires_at - safety_margin`. Past that point the whole derivation
//! chain (new assertion, stage A, stage B) runs again through the
//! [`TokenSource`]; there is no refresh grant in this flow.
//!
//! The cached value is guarded by an async mutex held across derivation,
//! so concurrent callers of [`CredentialCache::get`] share a single
//! derivation instead of racing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::FederationError;
use crate::exchange::AccessToken;

/// Default margin before expiry at which a token stops being served
pub const DEFAULT_SAFETY_MARGIN_SECONDS: i64 = 300;

/// Anything able to derive a fresh access token
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken, FederationError>;
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    async fn fetch_token(&self) -> Result<AccessToken, FederationError> {
        (**self).fetch_token().await
    }
}

pub struct CredentialCache<S> {
    source: S,
    current: Mutex<Option<AccessToken>>,
    safety_margin: Duration,
    clock: Arc<dyn Clock>,
    derivations: AtomicU64,
}

impl<S: TokenSource> CredentialCache<S> {
    pub fn new(source: S, safety_margin: Duration) -> Self {
        Self {
            source,
            current: Mutex::new(None),
            safety_margin,
            clock: Arc::new(SystemClock),
            derivations: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// Number of derivations performed so far
    pub fn derivation_count(&self) -> u64 {
        self.derivations.load(Ordering::SeqCst)
    }

    /// A fresh access token, re-derived if the cached one is too close to
    /// expiry
    pub async fn get(&self) -> Result<AccessToken, FederationError> {
        let mut current = self.current.lock().await;
        let now = self.clock.now();

        let stale = match current.as_ref() {
            Some(token) => match self.check_fresh(token, now) {
                Ok(()) => {
                    debug!("Serving cached access token (expires at {})", token.expires_at());
                    return Ok(token.clone());
                }
                Err(reason) => Some(reason),
            },
            None => None,
        };

        match stale {
            Some(reason) => info!("{}, deriving a new one", reason),
            None => debug!("No cached access token, deriving one"),
        }

        let fresh = self.source.fetch_token().await?;
        self.derivations.fetch_add(1, Ordering::SeqCst);
        *current = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drop the cached token so that the next [`get`](Self::get) derives
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }

    fn check_fresh(&self, token: &AccessToken, now: DateTime<Utc>) -> Result<(), FederationError> {
        let refresh_at = token.expires_at().checked_sub_signed(self.safety_margin);
        if refresh_at.is_some_and(|at| now < at) {
            Ok(())
        } else {
            Err(FederationError::TokenExpired {
                expired_at: token.expires_at(),
            })
        }
    }
}
