// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only blob store for per-task transcripts.
//!
//! Each transcript is a flat file named by an opaque ref (a uuid). Writers
//! stream and fsync periodically, so a crash leaves the file readable up to
//! the last sync boundary. The store is faithful: display truncation is the
//! consumer's business.
//!
//! Retention: a ref may carry an expiry sidecar (`<ref>.expires`). The
//! periodic sweep removes expired refs, plus refs no operation references
//! once they have outlived a grace window.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Sync to disk after this many buffered bytes.
const SYNC_THRESHOLD_BYTES: usize = 64 * 1024;

/// Errors from log store operations
#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid log ref: {0}")]
    InvalidRef(String),
    #[error("log ref not found: {0}")]
    NotFound(String),
}

/// Handle-keyed blob store rooted at one directory.
pub struct LogStore {
    dir: PathBuf,
}

/// Streaming writer for one transcript.
pub struct LogWriter {
    file: File,
    bytes_since_sync: usize,
}

impl LogStore {
    /// Open (or create) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LogStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Create a new transcript, returning the writer and its opaque ref.
    pub fn create(&self) -> Result<(LogWriter, String), LogStoreError> {
        let refid = uuid::Uuid::new_v4().to_string();
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(self.blob_path(&refid)?)?;
        Ok((
            LogWriter {
                file,
                bytes_since_sync: 0,
            },
            refid,
        ))
    }

    /// Open a transcript for reading.
    pub fn open_reader(&self, refid: &str) -> Result<impl Read, LogStoreError> {
        let path = self.blob_path(refid)?;
        File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LogStoreError::NotFound(refid.to_string())
            } else {
                LogStoreError::Io(e)
            }
        })
    }

    /// Read a whole transcript into memory.
    pub fn read_to_string(&self, refid: &str) -> Result<String, LogStoreError> {
        let mut out = String::new();
        self.open_reader(refid)?.read_to_string(&mut out)?;
        Ok(out)
    }

    /// Remove a transcript and its expiry mark, if present.
    pub fn delete(&self, refid: &str) -> Result<(), LogStoreError> {
        let path = self.blob_path(refid)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let _ = fs::remove_file(self.expiry_path(refid)?);
        Ok(())
    }

    /// Mark a ref to be removed by the sweep once `expires_at_ms` passes.
    pub fn mark_expiring(&self, refid: &str, expires_at_ms: i64) -> Result<(), LogStoreError> {
        let path = self.expiry_path(refid)?;
        fs::write(path, expires_at_ms.to_string())?;
        Ok(())
    }

    /// Remove expired refs and unreferenced refs older than the grace window.
    ///
    /// `is_referenced` answers whether some operation still points at the
    /// ref. Returns how many transcripts were removed.
    pub fn sweep(
        &self,
        now_ms: i64,
        grace_ms: i64,
        is_referenced: impl Fn(&str) -> bool,
    ) -> Result<usize, LogStoreError> {
        let mut removed = 0usize;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(".expires") {
                continue;
            }
            // Stray non-ref files are not ours to reap
            if Self::check_ref(name).is_err() {
                continue;
            }
            let refid = name.to_string();

            let expired = match self.read_expiry(&refid) {
                Some(at_ms) => at_ms <= now_ms,
                None => false,
            };

            let orphaned = if expired {
                false
            } else if is_referenced(&refid) {
                false
            } else {
                // Unreferenced: only reap past the grace window
                let age_ms = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| now_ms - d.as_millis() as i64)
                    .unwrap_or(0);
                age_ms > grace_ms
            };

            if expired || orphaned {
                self.delete(&refid)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "swept task logs");
        }
        Ok(removed)
    }

    fn read_expiry(&self, refid: &str) -> Option<i64> {
        let path = self.expiry_path(refid).ok()?;
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    fn blob_path(&self, refid: &str) -> Result<PathBuf, LogStoreError> {
        Self::check_ref(refid)?;
        Ok(self.dir.join(refid))
    }

    fn expiry_path(&self, refid: &str) -> Result<PathBuf, LogStoreError> {
        Self::check_ref(refid)?;
        Ok(self.dir.join(format!("{refid}.expires")))
    }

    /// Refs are uuids; anything else is rejected so a ref can never
    /// traverse outside the store directory.
    fn check_ref(refid: &str) -> Result<(), LogStoreError> {
        let valid = !refid.is_empty()
            && refid
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if valid {
            Ok(())
        } else {
            Err(LogStoreError::InvalidRef(refid.to_string()))
        }
    }
}

impl LogWriter {
    /// Append bytes; syncs automatically at [`SYNC_THRESHOLD_BYTES`].
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), LogStoreError> {
        self.file.write_all(bytes)?;
        self.bytes_since_sync += bytes.len();
        if self.bytes_since_sync >= SYNC_THRESHOLD_BYTES {
            self.sync()?;
        }
        Ok(())
    }

    /// Append a line of text.
    pub fn append_line(&mut self, line: &str) -> Result<(), LogStoreError> {
        self.append(line.as_bytes())?;
        self.append(b"\n")
    }

    /// Flush buffered bytes to disk. This is the crash-safety boundary.
    pub fn sync(&mut self) -> Result<(), LogStoreError> {
        self.file.sync_data()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Sync and close the transcript.
    pub fn close(mut self) -> Result<(), LogStoreError> {
        self.sync()
    }
}

#[cfg(test)]
#[path = "logstore_tests.rs"]
mod tests;
