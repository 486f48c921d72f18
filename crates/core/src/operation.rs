// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation records — the unit of observability.
//!
//! Every attempt against a repository is recorded as an `Operation` in the
//! operation log. An operation carries a monotonic instance-local `id`, a
//! revision stamp `modno` bumped on every mutation, and exactly one tagged
//! payload describing what kind of work it was.

use crate::id::{InstanceId, PlanId, RepoGuid, RepoId};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Pending,
    InProgress,
    Success,
    Error,
    Warning,
    UserCancelled,
    SystemCancelled,
}

impl OpStatus {
    /// Terminal statuses are immutable except for administrative deletion.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OpStatus::Pending | OpStatus::InProgress)
    }
}

impl std::fmt::Display for OpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OpStatus::Pending => "pending",
            OpStatus::InProgress => "in_progress",
            OpStatus::Success => "success",
            OpStatus::Error => "error",
            OpStatus::Warning => "warning",
            OpStatus::UserCancelled => "user_cancelled",
            OpStatus::SystemCancelled => "system_cancelled",
        };
        write!(f, "{s}")
    }
}

/// Identity and timestamp of a snapshot in the external repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    pub unix_time_ms: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

/// Streaming progress of a running backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupProgress {
    pub percent_done: f64,
    pub files_done: u64,
    pub bytes_done: u64,
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub current_files: Vec<String>,
}

/// Final accounting of a completed backup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub files_new: u64,
    pub files_changed: u64,
    pub files_unmodified: u64,
    pub dirs_new: u64,
    pub dirs_changed: u64,
    pub dirs_unmodified: u64,
    pub data_blobs: u64,
    pub tree_blobs: u64,
    pub data_added: u64,
    pub total_files_processed: u64,
    pub total_bytes_processed: u64,
    pub snapshot_id: String,
}

/// Streaming progress of a running restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreProgress {
    pub percent_done: f64,
    pub bytes_restored: u64,
    pub total_bytes: u64,
}

/// Aggregate repository statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoStats {
    pub total_size: u64,
    pub total_file_count: u64,
    #[serde(default)]
    pub snapshot_count: u64,
}

/// The tagged payload variant of an operation.
///
/// Serializes with `{"type": "backup", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpPayload {
    Backup {
        paths: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        excludes: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<BackupProgress>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<BackupSummary>,
    },
    Forget {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        removed: Vec<SnapshotMeta>,
    },
    IndexSnapshot {
        snapshot: SnapshotMeta,
        /// Set once the snapshot is known to have been forgotten.
        #[serde(default)]
        forgot: bool,
    },
    Prune {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        output: String,
    },
    Check {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        output: String,
    },
    Stats {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stats: Option<RepoStats>,
    },
    Restore {
        snapshot_id: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        path: String,
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<RestoreProgress>,
    },
    RunHook {
        name: String,
        condition: String,
    },
    RunCommand {
        command: String,
    },
}

impl OpPayload {
    /// Payload kind for log spans and display (e.g. "backup", "forget")
    pub fn kind(&self) -> &'static str {
        match self {
            OpPayload::Backup { .. } => "backup",
            OpPayload::Forget { .. } => "forget",
            OpPayload::IndexSnapshot { .. } => "index_snapshot",
            OpPayload::Prune { .. } => "prune",
            OpPayload::Check { .. } => "check",
            OpPayload::Stats { .. } => "stats",
            OpPayload::Restore { .. } => "restore",
            OpPayload::RunHook { .. } => "run_hook",
            OpPayload::RunCommand { .. } => "run_command",
        }
    }
}

/// A single attempt recorded in the operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Monotonic, instance-local id. Assigned by the log on insert.
    #[serde(default)]
    pub id: i64,
    /// Revision stamp, bumped on every mutation. Strictly increasing across
    /// the whole log, independent of `id`.
    #[serde(default)]
    pub modno: i64,
    /// Instance that owns this record.
    pub instance_id: InstanceId,
    /// Provenance key across peers; empty for purely local operations.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_instance_keyid: String,
    /// Id the record had on the originating instance (0 when local).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub original_id: i64,
    /// Flow id the record had on the originating instance (0 when local).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub original_flow_id: i64,
    pub repo_id: RepoId,
    #[serde(default)]
    pub repo_guid: RepoGuid,
    #[serde(default, skip_serializing_if = "PlanId::is_empty")]
    pub plan_id: PlanId,
    /// Groups causally related operations. The first operation's id *is*
    /// the flow id; the log assigns it on insert when left at 0.
    #[serde(default)]
    pub flow_id: i64,
    /// Snapshot this operation produced or targets, once known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snapshot_id: String,
    pub unix_time_start_ms: i64,
    #[serde(default)]
    pub unix_time_end_ms: i64,
    pub status: OpStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_message: String,
    /// Opaque handle into the log store for this operation's transcript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logref: Option<String>,
    pub payload: OpPayload,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Operation {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when this record was copied from a peer instance.
    pub fn is_remote(&self, local: &InstanceId) -> bool {
        self.instance_id != *local
    }
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
