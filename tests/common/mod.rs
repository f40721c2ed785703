// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once, OnceLock};

use chrono::{DateTime, Utc};
use wif_exchange::clock::Clock;
use wif_exchange::config::Config;
use wif_exchange::keys::SigningKeyPair;

static INIT: Once = Once::new();

pub const SERVICE_ACCOUNT: &str = "runner@proj.iam.gserviceaccount.com";
pub const GENERATE_ACCESS_TOKEN_PATH: &str =
    "/v1/projects/-/serviceAccounts/runner@proj.iam.gserviceaccount.com:generateAccessToken";

// Setup logger for tests
pub fn setup() {
    INIT.call_once(|| {
        env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

/// One RSA key for the whole test binary, generation is slow
pub fn signing_key() -> Arc<SigningKeyPair> {
    static KEY: OnceLock<Arc<SigningKeyPair>> = OnceLock::new();
    KEY.get_or_init(|| Arc::new(SigningKeyPair::generate().expect("key generation")))
        .clone()
}

/// Configuration pointing every endpoint at `base_uri`
pub fn config_for(base_uri: &str) -> Config {
    let mut config = Config::default();
    config.identity.issuer = "https://idp.test".to_string();
    config.identity.subject = "user-42".to_string();
    config.identity.audience = "aud-1".to_string();
    config.identity.key_id = Some("test-key".to_string());
    config
        .identity
        .attributes
        .insert("email".to_string(), "u@test".into());

    config.federation.project_number = "123456".to_string();
    config.federation.pool_id = "pool".to_string();
    config.federation.provider_id = "provider".to_string();
    config.federation.service_account_email = SERVICE_ACCOUNT.to_string();
    config.federation.sts_endpoint = format!("{}/v1/token", base_uri);
    config.federation.iam_credentials_endpoint = base_uri.to_string();
    config.federation.request_timeout_seconds = 5;
    config.federation.retry.max_attempts = 5;
    config.federation.retry.interval_seconds = 0;

    config.resource.endpoint = base_uri.to_string();
    config.resource.project_id = "p".to_string();
    config
}

/// Clock the test moves by hand
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
