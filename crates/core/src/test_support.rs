// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders shared by other crates' tests

use crate::operation::{OpPayload, OpStatus, Operation};

/// A minimal pending backup operation for tests.
pub fn backup_op(instance: &str, repo_guid: &str, plan: &str) -> Operation {
    Operation {
        id: 0,
        modno: 0,
        instance_id: instance.into(),
        original_instance_keyid: String::new(),
        original_id: 0,
        original_flow_id: 0,
        repo_id: "repo".into(),
        repo_guid: repo_guid.into(),
        plan_id: plan.into(),
        flow_id: 0,
        snapshot_id: String::new(),
        unix_time_start_ms: 1_000,
        unix_time_end_ms: 0,
        status: OpStatus::Pending,
        display_message: String::new(),
        logref: None,
        payload: OpPayload::Backup {
            paths: vec!["/data".to_string()],
            excludes: vec![],
            progress: None,
            summary: None,
        },
    }
}
