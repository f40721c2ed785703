// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Identity assertion configuration
//!
//! Claims and lifetime of the identity assertions minted by the
//! assertion builder.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assertion::{ClaimSet, DEFAULT_VALIDITY_SECONDS, MAX_VALIDITY_SECONDS};
use crate::error::FederationError;

/// Claims of the external identity assertion.
///
/// # Fields
///
/// * `issuer` - Identifies the asserting authority; must match the provider's issuer URI
/// * `subject` - The identity being asserted
/// * `audience` - Must equal one of the provider's allowed audiences
/// * `key_id` - `kid` header value; the RFC 7638 thumbprint of the key when unset
/// * `attributes` - Extra claims available to the provider's attribute mapping
/// * `validity_seconds` - Assertion lifetime, at most one day (default: 3600)
///
/// # Example
///
/// ```
/// use wif_exchange::config::IdentityConfig;
///
/// let identity = IdentityConfig {
///     issuer: "https://idp.example.com".to_string(),
///     subject: "user-42".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(identity.claim_set().subject, "user-42");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub issuer: String,
    pub subject: String,
    pub audience: String,
    pub key_id: Option<String>,
    pub attributes: BTreeMap<String, Value>,
    pub validity_seconds: i64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            issuer: "https://idp.example.com".to_string(),
            subject: "workload-1".to_string(),
            audience: "gcp-workload-identity".to_string(),
            key_id: None,
            attributes: BTreeMap::new(),
            validity_seconds: DEFAULT_VALIDITY_SECONDS,
        }
    }
}

impl IdentityConfig {
    pub fn claim_set(&self) -> ClaimSet {
        ClaimSet {
            issuer: self.issuer.clone(),
            subject: self.subject.clone(),
            audience: self.audience.clone(),
            attributes: self.attributes.clone(),
        }
    }

    /// Assertion lifetime as a duration
    ///
    /// Fails outside `1..=MAX_VALIDITY_SECONDS`, so an unvalidated value
    /// (a command-line override for instance) never reaches the signer.
    pub fn validity(&self) -> Result<Duration, FederationError> {
        if !(1..=MAX_VALIDITY_SECONDS).contains(&self.validity_seconds) {
            return Err(FederationError::validation(
                "identity.validity_seconds",
                format!(
                    "must be between 1 and {}, got {}",
                    MAX_VALIDITY_SECONDS, self.validity_seconds
                ),
            ));
        }
        Duration::try_seconds(self.validity_seconds).ok_or_else(|| {
            FederationError::validation("identity.validity_seconds", "out of range")
        })
    }
}
