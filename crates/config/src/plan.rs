// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backup plan definitions

use crate::{Hook, RetentionPolicy, Schedule};
use backrest_core::{PlanId, RepoId};
use serde::{Deserialize, Serialize};

/// A backup plan: what to back up, where, when, and what to keep.
///
/// The plan id is immutable after creation; operations reference it
/// forever, even after the plan is deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub repo: RepoId,
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,
    /// Case-insensitive exclude patterns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignores: Vec<String>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<Hook>,
}
