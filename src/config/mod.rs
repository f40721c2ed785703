// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the federation client
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against a JSON schema, then against semantic rules that the
//! schema cannot express.
//!
//! ## Configuration Structure
//!
//! - `identity`: Claims and lifetime of the identity assertion
//! - `federation`: Workload identity provider, service account, endpoints,
//!   stage B retry and expiry policies
//! - `resource`: The protected collection to list
//! - `cache`: Credential cache safety margin
//! - `keys`: Signing key files
//!
//! There is no global configuration; each component receives the section
//! it needs through its constructor.
//!
//! ## Usage
//!
//! ```no_run
//! use wif_exchange::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("user-42".to_string()), // Subject
//!     None,                        // Audience
//!     None,                        // Service account
//!     None,                        // Resource project
//!     None,                        // Private key path
//!     None,                        // Public key path
//! );
//!
//! println!("Impersonating {}", config.federation.service_account_email);
//! ```

pub mod federation;
pub mod identity;
pub mod resource;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

// Re-export all types for public API
pub use federation::{ExpiryConfig, FederationConfig, RetryConfig};
pub use identity::IdentityConfig;
pub use resource::{CacheConfig, KeysConfig, ResourceConfig};
pub use utils::{output_config_schema, validate_specific_rules};

/// Embedded JSON schema of the configuration file
pub const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Root configuration structure.
///
/// Every section falls back to its defaults when absent, so a file only
/// needs to spell out what differs from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Claims of the identity assertion
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Both exchange stages
    #[serde(default)]
    pub federation: FederationConfig,

    #[serde(default)]
    pub resource: ResourceConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub keys: KeysConfig,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is created with the default configuration. A file
    /// failing validation leaves a `.sample.yaml` next to it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        let config = match Self::from_yaml_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration error in {}: {:#}", path.display(), err);
                Self::create_sample_config(path)?;
                return Err(err.context(format!(
                    "Invalid configuration file {}",
                    path.display()
                )));
            }
        };

        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        // YAML to a generic value, then JSON for schema validation
        let yaml_value: serde_yml::Value =
            serde_yml::from_str(contents).context("Failed to parse YAML configuration")?;
        let json_value = serde_json::to_value(&yaml_value)
            .context("Failed to convert YAML to JSON for validation")?;

        let schema: serde_json::Value =
            serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;
        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)
            .context("Failed to compile JSON schema")?;

        debug!("Validating configuration against schema");
        if let Err(error) = validator.validate(&json_value) {
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = serde_yml::from_str(contents)
            .context("Failed to deserialize configuration")?;

        validate_specific_rules(&config)?;
        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only explicitly provided values override the file.
    ///
    /// # Parameters
    ///
    /// * `subject` - Subject claim of the assertion
    /// * `audience` - Audience claim of the assertion
    /// * `service_account_email` - Service account to impersonate
    /// * `project_id` - Project owning the listed resources
    /// * `private_key_path` - PEM private key file
    /// * `public_key_path` - PEM public key file
    pub fn apply_args(
        &mut self,
        subject: Option<String>,
        audience: Option<String>,
        service_account_email: Option<String>,
        project_id: Option<String>,
        private_key_path: Option<PathBuf>,
        public_key_path: Option<PathBuf>,
    ) {
        if let Some(subject) = subject {
            debug!("Overriding subject from command line: {}", subject);
            self.identity.subject = subject;
        }
        if let Some(audience) = audience {
            debug!("Overriding audience from command line: {}", audience);
            self.identity.audience = audience;
        }
        if let Some(email) = service_account_email {
            debug!("Overriding service account from command line: {}", email);
            self.federation.service_account_email = email;
        }
        if let Some(project_id) = project_id {
            debug!("Overriding resource project from command line: {}", project_id);
            self.resource.project_id = project_id;
        }
        if let Some(path) = private_key_path {
            debug!("Overriding private key path from command line: {:?}", path);
            self.keys.private_key_path = path;
        }
        if let Some(path) = public_key_path {
            debug!("Overriding public key path from command line: {:?}", path);
            self.keys.public_key_path = path;
        }
    }
}
