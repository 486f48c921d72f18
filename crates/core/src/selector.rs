// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compositional predicates over operation records.
//!
//! A selector is a conjunction: every populated field must match for an
//! operation to be selected. An empty selector matches everything.

use crate::id::{InstanceId, PlanId, RepoGuid};
use crate::operation::{OpStatus, Operation};
use serde::{Deserialize, Serialize};

/// Conjunctive filter over operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_instance_keyid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_guid: Option<RepoGuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<PlanId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<Vec<OpStatus>>,
    /// Inclusive lower bound on `unix_time_start_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_after_ms: Option<i64>,
    /// Exclusive upper bound on `unix_time_start_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_before_ms: Option<i64>,
}

impl OpSelector {
    /// Selector that matches every operation.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_ids(mut self, ids: Vec<i64>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_instance_id(mut self, id: InstanceId) -> Self {
        self.instance_id = Some(id);
        self
    }

    pub fn with_repo_guid(mut self, guid: RepoGuid) -> Self {
        self.repo_guid = Some(guid);
        self
    }

    pub fn with_plan_id(mut self, id: PlanId) -> Self {
        self.plan_id = Some(id);
        self
    }

    pub fn with_snapshot_id(mut self, id: impl Into<String>) -> Self {
        self.snapshot_id = Some(id.into());
        self
    }

    pub fn with_flow_id(mut self, flow_id: i64) -> Self {
        self.flow_id = Some(flow_id);
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<OpStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn started_after(mut self, ms: i64) -> Self {
        self.started_after_ms = Some(ms);
        self
    }

    pub fn started_before(mut self, ms: i64) -> Self {
        self.started_before_ms = Some(ms);
        self
    }

    /// True when every populated field matches `op`.
    pub fn matches(&self, op: &Operation) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&op.id) {
                return false;
            }
        }
        if let Some(instance_id) = &self.instance_id {
            if op.instance_id != *instance_id {
                return false;
            }
        }
        if let Some(keyid) = &self.original_instance_keyid {
            if op.original_instance_keyid != *keyid {
                return false;
            }
        }
        if let Some(guid) = &self.repo_guid {
            if op.repo_guid != *guid {
                return false;
            }
        }
        if let Some(plan_id) = &self.plan_id {
            if op.plan_id != *plan_id {
                return false;
            }
        }
        if let Some(snapshot_id) = &self.snapshot_id {
            if op.snapshot_id != *snapshot_id {
                return false;
            }
        }
        if let Some(flow_id) = self.flow_id {
            if op.flow_id != flow_id {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&op.status) {
                return false;
            }
        }
        if let Some(after) = self.started_after_ms {
            if op.unix_time_start_ms < after {
                return false;
            }
        }
        if let Some(before) = self.started_before_ms {
            if op.unix_time_start_ms >= before {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;
