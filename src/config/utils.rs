// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::debug;

use super::{Config, CONFIG_SCHEMA};
use crate::assertion::MAX_VALIDITY_SECONDS;
use crate::exchange::token::MAX_TTL_SECONDS;
use crate::keys::MIN_KEY_BITS;
use crate::utility::http::parse_endpoint;

/// Output the embedded JSON schema to the console.
///
/// # Example
///
/// ```bash
/// ./wif show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Claims**: issuer, subject and audience are set and no attribute shadows a registered claim
/// - **Provider**: project number, pool and provider ids form a valid audience
/// - **Endpoints**: every endpoint is an absolute http(s) URL
/// - **Lifetimes**: assertion validity at most one day, default token TTL at most 12 hours,
///   and the cache margin shorter than both
/// - **Retry**: at least one attempt is made
/// - **Keys**: at least 2048-bit RSA
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    let identity = &config.identity;
    identity
        .claim_set()
        .validate()
        .context("Invalid identity section")?;
    identity.validity().context("Invalid identity section")?;
    if let Some(kid) = &identity.key_id {
        if kid.trim().is_empty() {
            anyhow::bail!("identity.key_id must not be empty when set");
        }
    }

    let federation = &config.federation;
    federation
        .provider_ref()
        .validate()
        .context("Invalid federation provider")?;
    match federation.service_account_email.split_once('@') {
        Some((name, domain)) if !name.is_empty() && domain.contains('.') => {}
        _ => anyhow::bail!(
            "federation.service_account_email '{}' is not an email address",
            federation.service_account_email
        ),
    }
    if federation.scopes.is_empty() || federation.scopes.iter().any(|s| s.trim().is_empty()) {
        anyhow::bail!("federation.scopes must contain at least one non-empty scope");
    }
    parse_endpoint("federation.sts_endpoint", &federation.sts_endpoint)?;
    parse_endpoint(
        "federation.iam_credentials_endpoint",
        &federation.iam_credentials_endpoint,
    )?;
    if federation.request_timeout_seconds == 0 {
        anyhow::bail!("federation.request_timeout_seconds must be positive");
    }
    if let Some(lifetime) = federation.lifetime_seconds {
        if lifetime == 0 || lifetime > MAX_TTL_SECONDS.unsigned_abs() {
            anyhow::bail!(
                "federation.lifetime_seconds must be between 1 and {}, got {}",
                MAX_TTL_SECONDS,
                lifetime
            );
        }
    }
    if federation.retry.max_attempts == 0 {
        anyhow::bail!("federation.retry.max_attempts must be at least 1");
    }
    if let Some(max) = federation.retry.max_interval_seconds {
        if max < federation.retry.interval_seconds {
            anyhow::bail!(
                "federation.retry.max_interval_seconds ({}) is below interval_seconds ({})",
                max,
                federation.retry.interval_seconds
            );
        }
    }
    let ttl = federation.expiry.default_ttl_seconds;
    if !(1..=MAX_TTL_SECONDS).contains(&ttl) {
        anyhow::bail!(
            "federation.expiry.default_ttl_seconds must be between 1 and {}, got {}",
            MAX_TTL_SECONDS,
            ttl
        );
    }

    let resource = &config.resource;
    parse_endpoint("resource.endpoint", &resource.endpoint)?;
    if resource.project_id.trim().is_empty() || resource.project_id.contains('/') {
        anyhow::bail!("resource.project_id '{}' is invalid", resource.project_id);
    }
    if resource.collection.trim().is_empty() {
        anyhow::bail!("resource.collection must not be empty");
    }
    if resource.max_pages == 0 {
        anyhow::bail!("resource.max_pages must be at least 1");
    }

    let margin = config.cache.safety_margin_seconds;
    if margin < 0 {
        anyhow::bail!("cache.safety_margin_seconds must not be negative");
    }
    if margin >= federation.expiry.default_ttl_seconds {
        anyhow::bail!(
            "cache.safety_margin_seconds ({}) must be shorter than the token TTL ({})",
            margin,
            federation.expiry.default_ttl_seconds
        );
    }
    if margin >= identity.validity_seconds {
        anyhow::bail!(
            "cache.safety_margin_seconds ({}) must be shorter than the assertion validity ({})",
            margin,
            identity.validity_seconds
        );
    }

    if config.keys.key_bits < MIN_KEY_BITS {
        anyhow::bail!(
            "keys.key_bits must be at least {}, got {}",
            MIN_KEY_BITS,
            config.keys.key_bits
        );
    }

    Ok(())
}
