// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for operation-log compaction and crash recovery.
//!
//! A snapshot stores the complete log state at a WAL sequence number,
//! zstd-compressed. Recovery loads the snapshot and replays WAL entries
//! after that sequence. The save path is atomic: write `.tmp`, fsync,
//! rename, fsync the directory — only then is the WAL safe to truncate.

use crate::migration::MigrationRegistry;
use crate::oplog::OpLogState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Schema version written into new snapshots.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

/// Errors that can occur in snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compression error: {0}")]
    Compress(String),
    #[error(transparent)]
    Migration(#[from] crate::migration::MigrationError),
}

/// A snapshot of the operation log at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OplogSnapshot {
    /// Schema version, consulted by the migration registry on load
    pub v: u32,
    /// WAL sequence number at the time of snapshot
    pub seq: u64,
    /// The complete log state
    pub state: OpLogState,
    /// When this snapshot was created
    pub created_at: DateTime<Utc>,
}

impl OplogSnapshot {
    pub fn new(seq: u64, state: OpLogState) -> Self {
        Self {
            v: CURRENT_SNAPSHOT_VERSION,
            seq,
            state,
            created_at: Utc::now(),
        }
    }

    /// Save the snapshot atomically (write `.tmp`, fsync, rename, fsync dir).
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("tmp");

        let json_bytes = serde_json::to_vec(self)?;
        // zstd level 3 is a good balance of speed and compression
        let compressed = zstd::encode_all(json_bytes.as_slice(), 3)
            .map_err(|e| SnapshotError::Compress(e.to_string()))?;

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&compressed)?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, path)?;

        // Make the rename durable before the caller truncates the WAL
        if let Some(parent) = path.parent() {
            File::open(parent)?.sync_all()?;
        }

        Ok(())
    }

    /// Load a snapshot if one exists.
    ///
    /// Returns `Ok(None)` if the file doesn't exist or is corrupt.
    /// Corrupt snapshots are moved to a `.bak` file so recovery can
    /// proceed via WAL replay.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(path)?;
        let parsed: Result<Value, String> = zstd::stream::read::Decoder::new(file)
            .map_err(|e| e.to_string())
            .and_then(|decoder| serde_json::from_reader(decoder).map_err(|e| e.to_string()));

        let value = match parsed {
            Ok(v) => v,
            Err(e) => {
                let bak_path = rotate_bak_path(path);
                warn!(
                    error = %e,
                    path = %path.display(),
                    bak = %bak_path.display(),
                    "Corrupt snapshot, moving to .bak and recovering from the WAL",
                );
                fs::rename(path, &bak_path)?;
                return Ok(None);
            }
        };

        let registry = MigrationRegistry::new();
        let migrated = registry.migrate_to(value, CURRENT_SNAPSHOT_VERSION)?;
        let snapshot: OplogSnapshot = serde_json::from_value(migrated)?;
        Ok(Some(snapshot))
    }
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
pub(crate) fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    // Remove the oldest if at capacity
    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    // Shift existing backups up by one
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}
