// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Resource API, credential cache and key file configuration

use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_SAFETY_MARGIN_SECONDS;
use crate::keys::MIN_KEY_BITS;
use crate::resource::{DEFAULT_MAX_PAGES, DEFAULT_RESOURCE_ENDPOINT};

/// The protected collection listed with the access token.
///
/// Requests go to `{endpoint}/v1/projects/{project_id}/{collection}` and
/// items are read from `items_key` (the collection name when unset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub endpoint: String,
    pub project_id: String,
    pub collection: String,
    pub items_key: Option<String>,
    pub page_size: Option<u32>,
    pub max_pages: u32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_RESOURCE_ENDPOINT.to_string(),
            project_id: "my-project".to_string(),
            collection: "topics".to_string(),
            items_key: None,
            page_size: None,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

/// Credential cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// A cached token is re-derived this long before it expires (default: 300)
    pub safety_margin_seconds: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            safety_margin_seconds: DEFAULT_SAFETY_MARGIN_SECONDS,
        }
    }
}

impl CacheConfig {
    pub fn safety_margin(&self) -> Duration {
        Duration::try_seconds(self.safety_margin_seconds)
            .unwrap_or_else(|| Duration::seconds(DEFAULT_SAFETY_MARGIN_SECONDS))
    }
}

/// Location and size of the signing key pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// PKCS#1 PEM private key
    pub private_key_path: PathBuf,
    /// SPKI PEM public key
    pub public_key_path: PathBuf,
    pub key_bits: usize,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            private_key_path: PathBuf::from("private_key.pem"),
            public_key_path: PathBuf::from("public_key.pem"),
            key_bits: MIN_KEY_BITS,
        }
    }
}
