// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Identity assertion construction
//!
//! An identity assertion is the externally issued, RS256-signed JWT that
//! stage A of the exchange presents to the security token service. This
//! module builds and signs assertions, decodes them for inspection, and
//! verifies them locally against a [`KeySet`] for diagnostics. The
//! federation provider remains the authority on whether an assertion is
//! accepted.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::error::FederationError;
use crate::keys::{KeySet, SigningKeyPair};

/// Default assertion lifetime
pub const DEFAULT_VALIDITY_SECONDS: i64 = 3600;
/// Longest assertion lifetime the builder signs
pub const MAX_VALIDITY_SECONDS: i64 = 86_400;

/// Claim names owned by the builder; attributes may not shadow them
const RESERVED_CLAIMS: [&str; 7] = ["iss", "sub", "aud", "iat", "exp", "nbf", "jti"];

/// Caller-provided claims of an assertion
///
/// `issuer`, `subject` and `audience` are required. `attributes` are
/// free-form claims (e.g. `email`, `environment`) that the provider can use
/// in its attribute mapping.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClaimSet {
    pub issuer: String,
    pub subject: String,
    /// Must equal the audience accepted by the federation provider
    pub audience: String,
    pub attributes: BTreeMap<String, Value>,
}

impl ClaimSet {
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
            audience: audience.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Check required claims before any signing attempt
    pub fn validate(&self) -> Result<(), FederationError> {
        for (field, value) in [
            ("issuer", &self.issuer),
            ("subject", &self.subject),
            ("audience", &self.audience),
        ] {
            if value.trim().is_empty() {
                return Err(FederationError::validation(field, "required claim is empty"));
            }
        }

        if let Some(name) = self
            .attributes
            .keys()
            .find(|name| RESERVED_CLAIMS.contains(&name.as_str()))
        {
            return Err(FederationError::validation(
                format!("attribute '{}'", name),
                "shadows a registered claim",
            ));
        }

        Ok(())
    }
}

/// Claims as serialized in the JWT payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl AssertionClaims {
    /// The caller-provided part of the claims
    pub fn claim_set(&self) -> ClaimSet {
        ClaimSet {
            issuer: self.iss.clone(),
            subject: self.sub.clone(),
            audience: self.aud.clone(),
            attributes: self.attributes.clone(),
        }
    }

    pub fn validity(&self) -> Duration {
        Duration::try_seconds(self.exp.saturating_sub(self.iat)).unwrap_or(Duration::MAX)
    }
}

/// A signed compact assertion: `base64url(header).base64url(claims).base64url(signature)`
///
/// Immutable once signed.
#[derive(Clone)]
pub struct IdentityAssertion {
    token: String,
    header: Header,
    claims: AssertionClaims,
}

impl std::fmt::Debug for IdentityAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityAssertion")
            .field("kid", &self.header.kid)
            .field("claims", &self.claims)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl IdentityAssertion {
    /// Decode a compact assertion without verifying its signature
    pub fn decode(token: &str) -> Result<Self, FederationError> {
        let token = token.trim();
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(FederationError::validation(
                "assertion",
                "expected three non-empty dot-separated segments",
            ));
        }

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| FederationError::validation("assertion header", e.to_string()))?;

        let payload = URL_SAFE_NO_PAD
            .decode(segments[1])
            .map_err(|e| FederationError::validation("assertion claims", e.to_string()))?;
        let claims: AssertionClaims = serde_json::from_slice(&payload)
            .map_err(|e| FederationError::validation("assertion claims", e.to_string()))?;

        Ok(Self {
            token: token.to_string(),
            header,
            claims,
        })
    }

    /// The compact serialization sent as `subject_token`
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn claims(&self) -> &AssertionClaims {
        &self.claims
    }

    pub fn key_id(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        timestamp(self.claims.iat)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp(self.claims.exp)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// First characters of the token, for display
    pub fn preview(&self, len: usize) -> String {
        match self.token.char_indices().nth(len) {
            Some((idx, _)) => format!("{}...", &self.token[..idx]),
            None => self.token.clone(),
        }
    }

    /// Verify the signature against the key set entry named by `kid`
    ///
    /// This is a local diagnostic. Expiry is checked; the audience is
    /// checked only when `expected_audience` is given.
    pub fn verify(
        &self,
        key_set: &KeySet,
        expected_audience: Option<&str>,
    ) -> Result<AssertionClaims, FederationError> {
        let kid = self
            .key_id()
            .ok_or_else(|| FederationError::validation("assertion header", "missing kid"))?;
        let jwk = key_set.find(kid).ok_or_else(|| {
            FederationError::validation("kid", format!("'{}' not found in key set", kid))
        })?;

        let decoding_key = DecodingKey::from_jwk(jwk)
            .map_err(|e| FederationError::crypto(format!("unusable JWK '{}': {}", kid, e)))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        match expected_audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        jsonwebtoken::decode::<AssertionClaims>(&self.token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| FederationError::crypto(format!("assertion verification failed: {}", e)))
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Sign `claims` with `key` at the current time
///
/// `issued_at` is now and `expires_at = issued_at + validity`.
pub fn build_and_sign(
    key: &SigningKeyPair,
    key_id: &str,
    claims: &ClaimSet,
    validity: Duration,
) -> Result<IdentityAssertion, FederationError> {
    build_and_sign_at(key, key_id, claims, validity, Utc::now())
}

/// Sign `claims` with `key`, using `now` as the issue time
pub fn build_and_sign_at(
    key: &SigningKeyPair,
    key_id: &str,
    claims: &ClaimSet,
    validity: Duration,
    now: DateTime<Utc>,
) -> Result<IdentityAssertion, FederationError> {
    claims.validate()?;
    if key_id.trim().is_empty() {
        return Err(FederationError::validation("key_id", "must not be empty"));
    }
    // Whole seconds only: a sub-second validity would sign exp == iat
    if !(1..=MAX_VALIDITY_SECONDS).contains(&validity.num_seconds()) {
        return Err(FederationError::validation(
            "validity",
            format!(
                "must be between 1s and {}s, got {}ms",
                MAX_VALIDITY_SECONDS,
                validity.num_milliseconds()
            ),
        ));
    }

    let iat = now.timestamp();
    let payload = AssertionClaims {
        iss: claims.issuer.clone(),
        sub: claims.subject.clone(),
        aud: claims.audience.clone(),
        iat,
        exp: iat + validity.num_seconds(),
        attributes: claims.attributes.clone(),
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(key_id.to_string());

    let token = jsonwebtoken::encode(&header, &payload, &key.encoding_key()?)
        .map_err(|e| FederationError::crypto(format!("failed to sign assertion: {}", e)))?;

    debug!(
        "Signed assertion for sub={} aud={} kid={} exp={}",
        payload.sub, payload.aud, key_id, payload.exp
    );

    Ok(IdentityAssertion {
        token,
        header,
        claims: payload,
    })
}

/// Reusable assertion factory
///
/// Holds the key, key id, claims and validity so that a fresh assertion can
/// be minted for every exchange attempt.
///
/// ```no_run
/// use std::sync::Arc;
/// use wif_exchange::assertion::{AssertionBuilder, ClaimSet};
/// use wif_exchange::keys::SigningKeyPair;
///
/// let key = Arc::new(SigningKeyPair::generate().unwrap());
/// let claims = ClaimSet::new("https://idp.example.com", "user-42", "gcp-workload-identity")
///     .with_attribute("email", "user@example.com");
/// let assertion = AssertionBuilder::new(key, "key-1", claims).sign().unwrap();
/// assert_eq!(assertion.key_id(), Some("key-1"));
/// ```
#[derive(Clone)]
pub struct AssertionBuilder {
    key: Arc<SigningKeyPair>,
    key_id: String,
    claims: ClaimSet,
    validity: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AssertionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionBuilder")
            .field("key_id", &self.key_id)
            .field("claims", &self.claims)
            .field("validity", &self.validity)
            .finish()
    }
}

impl AssertionBuilder {
    pub fn new(key: Arc<SigningKeyPair>, key_id: impl Into<String>, claims: ClaimSet) -> Self {
        Self {
            key,
            key_id: key_id.into(),
            claims,
            validity: Duration::seconds(DEFAULT_VALIDITY_SECONDS),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Mint a new assertion issued now
    pub fn sign(&self) -> Result<IdentityAssertion, FederationError> {
        build_and_sign_at(
            &self.key,
            &self.key_id,
            &self.claims,
            self.validity,
            self.clock.now(),
        )
    }
}
