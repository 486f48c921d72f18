// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The peer-sync contract over the operation log.
//!
//! The bridge is deliberately thin: peers read our local operations (by
//! modno, so catch-up is incremental) and hand us theirs. Remote records
//! keep their foreign `instance_id` and provenance key; they are only
//! ever inserted or refreshed, never deleted, and nothing about them is
//! ever scheduled locally.

use backrest_core::{InstanceId, OpEvent, OpSelector, Operation, RepoGuid};
use backrest_storage::{OpLog, OpLogError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Read/write surface the sync layer has over the core.
pub struct SyncBridge {
    oplog: Arc<OpLog>,
    instance: InstanceId,
    /// Repos each peer announced it holds operations for.
    peer_repos: Mutex<HashMap<String, Vec<RepoGuid>>>,
}

impl SyncBridge {
    pub fn new(oplog: Arc<OpLog>, instance: InstanceId) -> Self {
        Self {
            oplog,
            instance,
            peer_repos: Mutex::new(HashMap::new()),
        }
    }

    /// Change stream for forwarding to peers.
    pub fn subscribe(&self) -> broadcast::Receiver<OpEvent> {
        self.oplog.subscribe()
    }

    /// Our own operations with modno greater than `since`, oldest first.
    ///
    /// Peers persist the highest modno they saw and resume from there.
    pub fn local_changes_since(&self, since_modno: i64) -> Vec<Operation> {
        let mut ops = Vec::new();
        self.oplog.query(
            &OpSelector::all().with_instance_id(self.instance.clone()),
            |op| {
                if op.modno > since_modno {
                    ops.push(op.clone());
                }
                true
            },
        );
        ops.sort_by_key(|op| op.modno);
        ops
    }

    /// Persist operations received from a peer (insert or refresh).
    ///
    /// Records claiming to be ours are dropped: a peer echoing our own
    /// operations back must not be able to rewrite local history.
    /// Returns how many were applied.
    pub fn apply_remote_operations(&self, ops: Vec<Operation>) -> Result<usize, OpLogError> {
        let mut applied = 0usize;
        for op in ops {
            if op.instance_id == self.instance {
                warn!(
                    op = op.id,
                    "dropping remote operation claiming local instance id"
                );
                continue;
            }
            self.oplog.apply_remote(op)?;
            applied += 1;
        }
        debug!(applied, "applied remote operations");
        Ok(applied)
    }

    /// Record which repos a peer holds operations for.
    pub fn announce_repo_list(&self, peer_id: &str, repos: Vec<RepoGuid>) {
        self.peer_repos.lock().insert(peer_id.to_string(), repos);
    }

    /// Repos a peer last announced.
    pub fn peer_repos(&self, peer_id: &str) -> Vec<RepoGuid> {
        self.peer_repos
            .lock()
            .get(peer_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
