// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repository definitions

use crate::{Hook, Schedule};
use backrest_core::{RepoGuid, RepoId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A configured backup repository.
///
/// `guid` and `uri` are immutable after creation; changing the uri means
/// pointing at different storage, which forces a new guid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub id: RepoId,
    /// Stable identity, assigned when the repo is first added.
    #[serde(default)]
    pub guid: RepoGuid,
    pub uri: String,
    pub password: String,
    /// Extra environment passed to the backup tool (e.g. cloud credentials).
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    /// Extra global flags passed to every invocation for this repo.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_policy: Option<PrunePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_policy: Option<CheckPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<Hook>,
    /// Unlock the repo before scheduled operations if a stale lock remains.
    #[serde(default)]
    pub auto_unlock: bool,
}

/// When and how aggressively to prune a repo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrunePolicy {
    #[serde(default)]
    pub schedule: Schedule,
    /// Reclaim space once more than this percentage of pack data is unused.
    #[serde(default)]
    pub max_unused_percent: f64,
}

/// When and how deeply to check a repo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckPolicy {
    #[serde(default)]
    pub schedule: Schedule,
    /// Percentage of pack data to read back and verify (0 = structure only).
    #[serde(default)]
    pub read_data_percent: f64,
}
