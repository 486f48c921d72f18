// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL mutation write-ahead log for the operation log.
//!
//! Every mutation is durably on disk before the operation log broadcasts
//! it, so observers never see a phantom event. Each entry is a single line
//! of JSON: `{"seq":N,"mutation":{...}}\n`.
//!
//! Recovery replays entries newer than the last snapshot. A corrupt tail
//! (torn write at crash) is rotated to `.bak` with the valid prefix
//! preserved, so a crash mid-write never blocks boot.

use backrest_core::Operation;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur in Wal operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single durable change to the operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpMutation {
    /// Insert or replace the operation with this id.
    Put { op: Operation },
    /// Remove the operations with these ids.
    Delete { ids: Vec<i64> },
}

/// Serialization helper for writing WAL entries without cloning the mutation.
#[derive(Serialize)]
struct WalRecordRef<'a> {
    seq: u64,
    mutation: &'a OpMutation,
}

/// Deserialization helper for reading WAL entries.
#[derive(Deserialize)]
struct WalRecord {
    seq: u64,
    mutation: OpMutation,
}

/// A single WAL entry with sequence number
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub seq: u64,
    pub mutation: OpMutation,
}

/// Append-only mutation log with synchronous commit.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Sequence number of the last entry written
    write_seq: u64,
}

impl Wal {
    /// Open or create a WAL, returning it together with every valid entry.
    ///
    /// If the file has a corrupt tail, the original is rotated to `.bak`
    /// and a clean file containing only the valid prefix replaces it.
    pub fn open(path: &Path) -> Result<(Self, Vec<WalEntry>), WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (entries, corrupt) = Self::scan(&file)?;

        let file = if corrupt {
            drop(file);
            let bak_path = crate::snapshot::rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = entries.len(),
                "Corrupt WAL tail detected, rotating to .bak and preserving valid entries",
            );
            std::fs::rename(path, &bak_path)?;

            {
                let mut new_file = File::create(path)?;
                for entry in &entries {
                    let record = WalRecordRef {
                        seq: entry.seq,
                        mutation: &entry.mutation,
                    };
                    serde_json::to_writer(&mut new_file, &record)?;
                    new_file.write_all(b"\n")?;
                }
                new_file.sync_all()?;
            }

            OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(path)?
        } else {
            file
        };

        let write_seq = entries.last().map(|e| e.seq).unwrap_or(0);

        Ok((
            Self {
                file,
                path: path.to_owned(),
                write_seq,
            },
            entries,
        ))
    }

    /// Read every parseable entry, reporting whether a corrupt tail was hit.
    fn scan(file: &File) -> Result<(Vec<WalEntry>, bool), WalError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut corrupt = false;
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    corrupt = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            // Stop at the first unparseable entry
            let record: WalRecord = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(_) => {
                    corrupt = true;
                    break;
                }
            };

            entries.push(WalEntry {
                seq: record.seq,
                mutation: record.mutation,
            });
        }

        Ok((entries, corrupt))
    }

    /// Append a mutation and fsync before returning.
    ///
    /// This is the durability point: once this returns, the mutation
    /// survives a crash.
    pub fn append_sync(&mut self, mutation: &OpMutation) -> Result<u64, WalError> {
        self.write_seq += 1;
        let seq = self.write_seq;
        let record = WalRecordRef { seq, mutation };
        let mut json_bytes = serde_json::to_vec(&record)?;
        json_bytes.push(b'\n');
        self.file.write_all(&json_bytes)?;
        self.file.sync_data()?;
        Ok(seq)
    }

    /// Sequence number of the last entry written.
    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    /// Raise the sequence counter to at least `seq`.
    ///
    /// Called after loading a snapshot so that fresh entries always sort
    /// after the snapshot even when the file itself was truncated.
    pub fn ensure_seq_at_least(&mut self, seq: u64) {
        self.write_seq = self.write_seq.max(seq);
    }

    /// Truncate the log after a snapshot made its contents redundant.
    ///
    /// The sequence counter keeps counting; only the file is emptied.
    pub fn reset(&mut self) -> Result<(), WalError> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let tmp_file = File::create(&tmp_path)?;
            tmp_file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
