// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bounded retry combinator
//!
//! [`with_retry`] wraps one async operation and re-runs it while the
//! supplied predicate classifies the failure as retryable, sleeping between
//! attempts according to a [`RetryPolicy`]. Only stage B opts into it; the
//! other stages call their clients directly.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{FederationError, Stage};

/// Default attempt cap for authorization propagation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;
/// Default delay between attempts
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    /// `interval * 2^(attempt-1)`, capped at `max_interval`
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff: Backoff,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
            backoff: Backoff::Fixed,
            max_interval: DEFAULT_INTERVAL,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            interval: Duration::ZERO,
            backoff: Backoff::Fixed,
            max_interval: Duration::ZERO,
        }
    }

    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            backoff: Backoff::Fixed,
            max_interval: interval,
        }
    }

    pub fn exponential(max_attempts: u32, interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            backoff: Backoff::Exponential,
            max_interval: max_interval.max(interval),
        }
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.interval
                    .checked_mul(factor)
                    .unwrap_or(self.max_interval)
                    .min(self.max_interval)
            }
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is reached
///
/// `operation` receives the 1-based attempt number. When retries run out
/// the last failure is wrapped in [`FederationError::RetriesExhausted`];
/// with a single-attempt policy it is returned unchanged.
pub async fn with_retry<F, Fut, T, P>(
    policy: &RetryPolicy,
    stage: Stage,
    is_retryable: P,
    mut operation: F,
) -> Result<T, FederationError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FederationError>>,
    P: Fn(&FederationError) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", stage, attempt);
                }
                return Ok(value);
            }
            Err(err) if is_retryable(&err) && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} attempt {}/{} failed, retrying in {:?}: {}",
                    stage, attempt, max_attempts, delay, err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) if is_retryable(&err) && max_attempts > 1 => {
                return Err(FederationError::RetriesExhausted {
                    stage,
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            Err(err) => return Err(err),
        }
    }
}
