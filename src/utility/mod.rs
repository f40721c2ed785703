// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Utility module for common utilities used throughout the project

pub mod artifacts;
pub mod http;

// Re-exports for use in other modules
pub use artifacts::{read_artifact, write_artifact, write_secret_artifact};
pub use http::build_client;
