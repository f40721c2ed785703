// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Reading and writing the on-disk artifacts of the flow (PEM keys, key
//! sets, assertions, access tokens)

use anyhow::{Context, Result};
use log::debug;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }
    Ok(())
}

/// Write a public artifact, creating parent directories as needed
pub fn write_artifact<P: AsRef<Path>>(path: P, contents: &str) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    let mut file =
        File::create(path).with_context(|| format!("Failed to create file at {:?}", path))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("Failed to write {:?}", path))?;
    debug!("Wrote {} bytes to {:?}", contents.len(), path);
    Ok(())
}

/// Write a secret artifact (private key, token) readable by the owner only
pub fn write_secret_artifact<P: AsRef<Path>>(path: P, contents: &str) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to create file at {:?}", path))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // mode() only applies on creation
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {:?}", path))?;
    }
    file.write_all(contents.as_bytes())
        .with_context(|| format!("Failed to write {:?}", path))?;
    debug!("Wrote secret artifact to {:?}", path);
    Ok(())
}

/// Read an artifact, trimming surrounding whitespace
pub fn read_artifact<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    Ok(contents.trim().to_string())
}
