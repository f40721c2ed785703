// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Signing Key Material
//!
//! This module generates the RSA key pair used to sign identity assertions
//! and publishes its public half as a JSON Web Key Set (RFC 7517) that the
//! federation provider uses to verify assertion signatures.
//!
//! ## Features
//!
//! * RSA key generation (2048 bits minimum)
//! * PEM persistence: PKCS#1 private key, SPKI public key
//! * JWK / JWK Set export with unpadded base64url modulus and exponent
//! * RFC 7638 thumbprints for use as a default key id
//!
//! ## Example
//!
//! ```no_run
//! use wif_exchange::keys::{export_public_as_key_set, SigningKeyPair};
//!
//! let key = SigningKeyPair::generate().unwrap();
//! let key_set = export_public_as_key_set(&key, "my-key-1").unwrap();
//! println!("{}", key_set.to_json_pretty().unwrap());
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, Jwk, KeyAlgorithm, PublicKeyUse, RSAKeyParameters,
    RSAKeyType,
};
use jsonwebtoken::EncodingKey;
use log::debug;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use rsa::sha2::{Digest, Sha256};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::FederationError;

/// Smallest accepted modulus size
pub const MIN_KEY_BITS: usize = 2048;

/// Algorithm advertised in the key set and used for assertion signatures
pub const SIGNING_ALGORITHM: &str = "RS256";

/// RSA key pair used to sign identity assertions
///
/// The private half never leaves this structure except through
/// [`SigningKeyPair::private_key_pem`], which the caller is responsible for
/// storing safely. The pair is immutable once created, so it can be shared
/// across threads (e.g. behind an `Arc`) by concurrent assertion builders.
#[derive(Clone)]
pub struct SigningKeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

/// Hides the key material from logs and debug output
impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("bits", &self.bits())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl SigningKeyPair {
    /// Generate a fresh 2048-bit key pair
    pub fn generate() -> Result<Self, FederationError> {
        Self::generate_with_bits(MIN_KEY_BITS)
    }

    /// Generate a fresh key pair with the given modulus size
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Crypto`] when `bits` is below
    /// [`MIN_KEY_BITS`] or when the RNG fails. Generation failures are
    /// fatal and must not be retried.
    pub fn generate_with_bits(bits: usize) -> Result<Self, FederationError> {
        if bits < MIN_KEY_BITS {
            return Err(FederationError::crypto(format!(
                "RSA keys must be at least {} bits, got {}",
                MIN_KEY_BITS, bits
            )));
        }

        debug!("Generating {}-bit RSA signing key", bits);
        let mut rng = rsa::rand_core::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| FederationError::crypto(format!("RSA key generation failed: {}", e)))?;

        Ok(Self::from_private_key(private_key))
    }

    /// Wrap an existing private key
    pub fn from_private_key(private_key: RsaPrivateKey) -> Self {
        let public_key = RsaPublicKey::from(&private_key);
        Self {
            private_key,
            public_key,
        }
    }

    /// Load a private key from PEM, accepting both PKCS#1
    /// (`RSA PRIVATE KEY`) and PKCS#8 (`PRIVATE KEY`) armor
    pub fn from_private_pem(pem: &str) -> Result<Self, FederationError> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| FederationError::crypto(format!("failed to parse RSA private key: {}", e)))?;

        let key = Self::from_private_key(private_key);
        if key.bits() < MIN_KEY_BITS {
            return Err(FederationError::crypto(format!(
                "RSA key is {} bits, at least {} required",
                key.bits(),
                MIN_KEY_BITS
            )));
        }
        Ok(key)
    }

    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        self.public_key.size() * 8
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Private key in PKCS#1 PEM format
    pub fn private_key_pem(&self) -> Result<String, FederationError> {
        let pem = self
            .private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| FederationError::crypto(format!("failed to encode private key: {}", e)))?;
        Ok(pem.to_string())
    }

    /// Public key in SPKI (`PUBLIC KEY`) PEM format
    pub fn public_key_pem(&self) -> Result<String, FederationError> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| FederationError::crypto(format!("failed to encode public key: {}", e)))
    }

    /// Signing key for `jsonwebtoken`
    pub fn encoding_key(&self) -> Result<EncodingKey, FederationError> {
        let der = self
            .private_key
            .to_pkcs1_der()
            .map_err(|e| FederationError::crypto(format!("failed to encode private key: {}", e)))?;
        Ok(EncodingKey::from_rsa_der(der.as_bytes()))
    }

    /// RFC 7638 thumbprint of the public key
    pub fn thumbprint(&self) -> Result<String, FederationError> {
        let (n, e) = encode_components(&self.public_key);
        KeySet::calculate_jwk_thumbprint(&n, &e)
    }

    /// Public half as a single-entry key set
    pub fn key_set(&self, key_id: &str) -> Result<KeySet, FederationError> {
        KeySet::from_public_key(&self.public_key, Some(key_id))
    }
}

/// Export the public half of `key` as a single-entry key set under `key_id`
pub fn export_public_as_key_set(
    key: &SigningKeyPair,
    key_id: &str,
) -> Result<KeySet, FederationError> {
    if key_id.trim().is_empty() {
        return Err(FederationError::validation("key_id", "must not be empty"));
    }
    key.key_set(key_id)
}

/// Parse an RSA public key from SPKI (`PUBLIC KEY`) or PKCS#1
/// (`RSA PUBLIC KEY`) PEM
pub fn load_public_key_pem(pem: &str) -> Result<RsaPublicKey, FederationError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| FederationError::crypto(format!("failed to parse RSA public key: {}", e)))
}

/// Unpadded base64url big-endian modulus and exponent
fn encode_components(public_key: &RsaPublicKey) -> (String, String) {
    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
    (n, e)
}

/// JSON Web Key Set
///
/// The document published (or uploaded) to the federation provider so it
/// can verify assertion signatures:
///
/// ```json
/// { "keys": [ { "kty": "RSA", "use": "sig", "kid": "...", "alg": "RS256", "n": "...", "e": "AQAB" } ] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySet {
    /// The set of JWKs
    pub keys: Vec<Jwk>,
}

impl KeySet {
    /// Build a single-entry key set from an RSA public key
    ///
    /// When `key_id` is `None` the RFC 7638 thumbprint is used as `kid`.
    pub fn from_public_key(
        public_key: &RsaPublicKey,
        key_id: Option<&str>,
    ) -> Result<Self, FederationError> {
        Ok(Self {
            keys: vec![Self::create_jwk_from_public_key(public_key, key_id)?],
        })
    }

    /// Create a JWK from an RSA public key
    pub fn create_jwk_from_public_key(
        public_key: &RsaPublicKey,
        key_id: Option<&str>,
    ) -> Result<Jwk, FederationError> {
        let (n, e) = encode_components(public_key);

        let key_id = match key_id {
            Some(kid) => kid.to_string(),
            None => Self::calculate_jwk_thumbprint(&n, &e)?,
        };

        Ok(Jwk {
            common: CommonParameters {
                public_key_use: Some(PublicKeyUse::Signature),
                key_id: Some(key_id),
                key_algorithm: Some(KeyAlgorithm::RS256),
                ..Default::default()
            },
            algorithm: AlgorithmParameters::RSA(RSAKeyParameters {
                key_type: RSAKeyType::RSA,
                n,
                e,
            }),
        })
    }

    /// Calculate a JWK thumbprint according to RFC 7638
    ///
    /// SHA-256 over the canonical `{"e","kty","n"}` member set, encoded as
    /// unpadded base64url.
    fn calculate_jwk_thumbprint(n: &str, e: &str) -> Result<String, FederationError> {
        // Required members in lexicographic order, no whitespace. Base64url
        // values never need JSON escaping.
        if [n, e].iter().any(|v| v.is_empty()) {
            return Err(FederationError::crypto("cannot fingerprint an empty RSA component"));
        }
        let canonical = format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, e, n);

        let hash = Sha256::digest(canonical.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(hash))
    }

    /// Look up a key by `kid`
    pub fn find(&self, key_id: &str) -> Option<&Jwk> {
        self.keys
            .iter()
            .find(|jwk| jwk.common.key_id.as_deref() == Some(key_id))
    }

    pub fn to_json_pretty(&self) -> Result<String, FederationError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FederationError::crypto(format!("failed to serialize key set: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self, FederationError> {
        serde_json::from_str(json)
            .map_err(|e| FederationError::validation("key set", e.to_string()))
    }
}
