// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Workload identity federation client library
//!
//! This library implements OAuth 2.0 Token Exchange (RFC 8693) federation:
//! an RS256 identity assertion signed with a local key is exchanged at a
//! security token service for a federated token, which is then exchanged
//! for an access token of a service account and used against a protected
//! resource API.
//!
//! The chain is split into the [`keys`], [`assertion`], [`exchange`],
//! [`resource`] and [`cache`] modules; [`pipeline`] wires the first three
//! together.

pub mod assertion;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod exchange;
pub mod keys;
pub mod pipeline;
pub mod resource;
pub mod utility;

pub use assertion::{build_and_sign, AssertionBuilder, ClaimSet, IdentityAssertion};
pub use cache::{CredentialCache, TokenSource};
pub use error::{FederationError, Stage};
pub use exchange::{AccessToken, ExchangeClient, FederatedToken, TokenResponse};
pub use keys::{export_public_as_key_set, KeySet, SigningKeyPair};
pub use pipeline::FederationPipeline;
pub use resource::{ResourceClient, ResourceList, ResourceRef};
