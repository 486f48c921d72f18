// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parsing of the backup tool's line-delimited JSON progress stream.
//!
//! Only backup and restore emit progress. Lines that are not JSON, or JSON
//! of an unknown message type, are passed through to the transcript and
//! otherwise ignored — the tool interleaves human-readable warnings freely.

use backrest_core::{BackupProgress, BackupSummary, RestoreProgress};
use serde::Deserialize;

/// A parsed event from the backup progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum BackupEvent {
    Status(BackupProgress),
    Summary(BackupSummary),
}

#[derive(Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
enum BackupMessage {
    Status {
        #[serde(default)]
        percent_done: f64,
        #[serde(default)]
        files_done: u64,
        #[serde(default)]
        bytes_done: u64,
        #[serde(default)]
        total_bytes: u64,
        #[serde(default)]
        current_files: Vec<String>,
    },
    Summary {
        #[serde(default)]
        files_new: u64,
        #[serde(default)]
        files_changed: u64,
        #[serde(default)]
        files_unmodified: u64,
        #[serde(default)]
        dirs_new: u64,
        #[serde(default)]
        dirs_changed: u64,
        #[serde(default)]
        dirs_unmodified: u64,
        #[serde(default)]
        data_blobs: u64,
        #[serde(default)]
        tree_blobs: u64,
        #[serde(default)]
        data_added: u64,
        #[serde(default)]
        total_files_processed: u64,
        #[serde(default)]
        total_bytes_processed: u64,
        #[serde(default)]
        snapshot_id: String,
    },
    #[serde(other)]
    Other,
}

/// Parse one backup output line into a progress event, if it is one.
pub fn parse_backup_line(line: &str) -> Option<BackupEvent> {
    match serde_json::from_str::<BackupMessage>(line.trim()).ok()? {
        BackupMessage::Status {
            percent_done,
            files_done,
            bytes_done,
            total_bytes,
            current_files,
        } => Some(BackupEvent::Status(BackupProgress {
            percent_done,
            files_done,
            bytes_done,
            total_bytes,
            current_files,
        })),
        BackupMessage::Summary {
            files_new,
            files_changed,
            files_unmodified,
            dirs_new,
            dirs_changed,
            dirs_unmodified,
            data_blobs,
            tree_blobs,
            data_added,
            total_files_processed,
            total_bytes_processed,
            snapshot_id,
        } => Some(BackupEvent::Summary(BackupSummary {
            files_new,
            files_changed,
            files_unmodified,
            dirs_new,
            dirs_changed,
            dirs_unmodified,
            data_blobs,
            tree_blobs,
            data_added,
            total_files_processed,
            total_bytes_processed,
            snapshot_id,
        })),
        BackupMessage::Other => None,
    }
}

#[derive(Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
enum RestoreMessage {
    Status {
        #[serde(default)]
        percent_done: f64,
        #[serde(default)]
        bytes_restored: u64,
        #[serde(default)]
        total_bytes: u64,
    },
    #[serde(other)]
    Other,
}

/// Parse one restore output line into a progress event, if it is one.
pub fn parse_restore_line(line: &str) -> Option<RestoreProgress> {
    match serde_json::from_str::<RestoreMessage>(line.trim()).ok()? {
        RestoreMessage::Status {
            percent_done,
            bytes_restored,
            total_bytes,
        } => Some(RestoreProgress {
            percent_done,
            bytes_restored,
            total_bytes,
        }),
        RestoreMessage::Other => None,
    }
}

/// One snapshot as listed by the tool's JSON output.
#[derive(Deserialize)]
pub(crate) struct RawSnapshot {
    pub id: String,
    pub time: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

impl RawSnapshot {
    pub(crate) fn into_meta(self) -> backrest_core::SnapshotMeta {
        let unix_time_ms = chrono_parse_ms(&self.time).unwrap_or(0);
        backrest_core::SnapshotMeta {
            id: self.id,
            unix_time_ms,
            tags: self.tags,
            paths: self.paths,
        }
    }
}

/// One forget group as reported by the tool: kept and removed snapshots.
#[derive(Deserialize)]
pub(crate) struct RawForgetGroup {
    #[serde(default)]
    pub remove: Option<Vec<RawSnapshot>>,
}

fn chrono_parse_ms(time: &str) -> Option<i64> {
    // RFC 3339 with or without fractional seconds
    time.parse::<chrono::DateTime<chrono::Utc>>()
        .ok()
        .map(|t| t.timestamp_millis())
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
