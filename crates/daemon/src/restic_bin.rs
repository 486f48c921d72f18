// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pinned backup-binary resolution and verification.
//!
//! The daemon never guesses: either `BACKREST_RESTIC_COMMAND` names an
//! absolute path, or the data directory holds the pinned
//! `restic/restic-<version>` the installer put there. Installed binaries
//! carry a sha256 sidecar written at install time; a mismatch means the
//! file was tampered with or corrupted and the daemon refuses to run it.

use crate::env::{Env, ENV_RESTIC_COMMAND};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// The pinned upstream version this build drives.
pub const RESTIC_VERSION: &str = "0.17.3";

/// Errors from binary resolution
#[derive(Debug, Error)]
pub enum BinaryError {
    #[error("backup binary not found at {0} (set BACKREST_RESTIC_COMMAND or run the installer)")]
    Missing(PathBuf),
    #[error("BACKREST_RESTIC_COMMAND must be an absolute path, got {0}")]
    NotAbsolute(String),
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve the backup binary for this process.
pub fn resolve_binary(env: &Env) -> Result<PathBuf, BinaryError> {
    if let Ok(command) = std::env::var(ENV_RESTIC_COMMAND) {
        let path = PathBuf::from(&command);
        if !path.is_absolute() {
            return Err(BinaryError::NotAbsolute(command));
        }
        if !path.exists() {
            return Err(BinaryError::Missing(path));
        }
        info!(binary = %path.display(), "using binary from environment override");
        return Ok(path);
    }

    let pinned = env.restic_dir().join(format!("restic-{RESTIC_VERSION}"));
    if !pinned.exists() {
        return Err(BinaryError::Missing(pinned));
    }

    // Verify against the installer's sidecar when present
    let sidecar = pinned.with_extension("sha256");
    if sidecar.exists() {
        let expected = std::fs::read_to_string(&sidecar)?;
        let expected = expected.split_whitespace().next().unwrap_or("").to_string();
        verify_sha256(&pinned, &expected)?;
    }
    Ok(pinned)
}

/// Check a file's sha256 against an expected lowercase hex digest.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<(), BinaryError> {
    let bytes = std::fs::read(path)?;
    let actual = format!("{:x}", Sha256::digest(&bytes));
    if actual != expected.to_lowercase() {
        return Err(BinaryError::ChecksumMismatch {
            path: path.to_owned(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "restic_bin_tests.rs"]
mod tests;
