// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Assertion signing, decoding and verification against published key sets

mod common;

use chrono::Duration;
use wif_exchange::assertion::{build_and_sign, ClaimSet, IdentityAssertion};
use wif_exchange::keys::{export_public_as_key_set, KeySet, SigningKeyPair};
use wif_exchange::FederationError;

fn claims() -> ClaimSet {
    ClaimSet::new("https://idp.test", "user-42", "aud-1")
        .with_attribute("email", "u@test")
        .with_attribute("groups", serde_json::json!(["dev", "ops"]))
}

#[test]
fn test_decoded_assertion_reproduces_claims() {
    common::setup();
    let key = common::signing_key();

    let assertion = build_and_sign(&key, "kid-1", &claims(), Duration::seconds(3600)).unwrap();
    let decoded = IdentityAssertion::decode(assertion.as_str()).unwrap();

    assert_eq!(decoded.key_id(), Some("kid-1"));
    assert_eq!(decoded.claims().claim_set(), claims());
    assert_eq!(decoded.claims().exp - decoded.claims().iat, 3600);
    assert_eq!(decoded.claims().validity(), Duration::seconds(3600));
}

#[test]
fn test_assertion_verifies_against_its_own_key_set() {
    common::setup();
    let key = common::signing_key();
    let key_set = export_public_as_key_set(&key, "kid-1").unwrap();

    let assertion = build_and_sign(&key, "kid-1", &claims(), Duration::seconds(600)).unwrap();
    let verified = assertion.verify(&key_set, Some("aud-1")).unwrap();
    assert_eq!(verified.sub, "user-42");
    assert_eq!(verified.attributes["email"], "u@test");
}

#[test]
fn test_assertion_fails_against_another_key() {
    common::setup();
    let key = common::signing_key();
    let other = SigningKeyPair::generate().unwrap();
    let other_set = export_public_as_key_set(&other, "kid-1").unwrap();

    let assertion = build_and_sign(&key, "kid-1", &claims(), Duration::seconds(600)).unwrap();
    let err = assertion.verify(&other_set, None).unwrap_err();
    assert!(matches!(err, FederationError::Crypto { .. }));
}

#[test]
fn test_verification_checks_audience_and_kid() {
    common::setup();
    let key = common::signing_key();
    let key_set = export_public_as_key_set(&key, "kid-1").unwrap();

    let assertion = build_and_sign(&key, "kid-1", &claims(), Duration::seconds(600)).unwrap();
    assert!(assertion.verify(&key_set, Some("gcp-workload-identity")).is_err());

    let unknown_kid = build_and_sign(&key, "kid-2", &claims(), Duration::seconds(600)).unwrap();
    assert!(matches!(
        unknown_kid.verify(&key_set, None),
        Err(FederationError::Validation { .. })
    ));
}

#[test]
fn test_key_set_survives_publication() {
    common::setup();
    let key = common::signing_key();
    let published = export_public_as_key_set(&key, "kid-1")
        .unwrap()
        .to_json_pretty()
        .unwrap();

    let fetched = KeySet::from_json(&published).unwrap();
    let assertion = build_and_sign(&key, "kid-1", &claims(), Duration::seconds(600)).unwrap();
    assert!(assertion.verify(&fetched, None).is_ok());
}
