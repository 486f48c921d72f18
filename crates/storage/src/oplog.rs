// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The operation log: durable, indexed, observable.
//!
//! A single-writer, many-reader store. Writers serialize on the inner
//! write lock; reads take the shared side and work against the in-memory
//! state. Every mutation is fsynced to the WAL before its event is
//! broadcast, so subscribers never observe a change that could be lost.
//!
//! Subscribers get at-least-once delivery over a broadcast channel. A
//! receiver that lags is tagged dirty by the channel (`RecvError::Lagged`)
//! and must requery before trusting the stream again. Late subscribers
//! miss nothing provided they query first and then reconcile by `modno`.

use crate::snapshot::OplogSnapshot;
use crate::wal::{OpMutation, Wal, WalError};
use crate::SnapshotError;
use backrest_core::{InstanceId, OpEvent, OpSelector, Operation, RepoGuid};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Idle interval between keep-alive events on the subscription stream.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Mutations between automatic snapshot compactions.
const COMPACT_EVERY_MUTATIONS: u64 = 4096;

/// Broadcast buffer per subscriber before the channel reports lag.
const SUBSCRIBER_BUFFER: usize = 1024;

/// Errors from operation log calls
#[derive(Debug, Error)]
pub enum OpLogError {
    #[error("operation not found: {0}")]
    NotFound(i64),
    #[error(transparent)]
    Wal(#[from] WalError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Outcome of a transform callback for a single operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformed {
    /// Leave the operation untouched.
    Keep,
    /// Replace the operation (id is preserved, modno reassigned).
    Update(Operation),
    /// Delete the operation.
    Delete,
}

/// Serializable log state: every live operation plus id/modno watermarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpLogState {
    pub next_id: i64,
    pub next_modno: i64,
    pub ops: BTreeMap<i64, Operation>,
}

impl Default for OpLogState {
    fn default() -> Self {
        Self {
            next_id: 1,
            next_modno: 1,
            ops: BTreeMap::new(),
        }
    }
}

impl OpLogState {
    /// Apply a mutation, keeping the id/modno watermarks ahead of contents.
    fn apply(&mut self, mutation: &OpMutation) {
        match mutation {
            OpMutation::Put { op } => {
                self.next_id = self.next_id.max(op.id + 1);
                self.next_modno = self.next_modno.max(op.modno + 1);
                self.ops.insert(op.id, op.clone());
            }
            OpMutation::Delete { ids } => {
                for id in ids {
                    self.ops.remove(id);
                }
            }
        }
    }
}

/// Secondary indexes, rebuilt from state on load.
#[derive(Default)]
struct Indexes {
    by_flow: HashMap<i64, BTreeSet<i64>>,
    /// (start_ms, id) per repo guid — supports time-ranged repo queries
    by_repo: HashMap<RepoGuid, BTreeSet<(i64, i64)>>,
    /// (modno, id) per instance — supports sync catch-up by revision
    by_instance: HashMap<InstanceId, BTreeSet<(i64, i64)>>,
    /// (instance, original id) → local id, for remote upserts
    by_original: HashMap<(InstanceId, i64), i64>,
}

impl Indexes {
    fn rebuild(state: &OpLogState) -> Self {
        let mut indexes = Self::default();
        for op in state.ops.values() {
            indexes.insert(op);
        }
        indexes
    }

    fn insert(&mut self, op: &Operation) {
        self.by_flow.entry(op.flow_id).or_default().insert(op.id);
        self.by_repo
            .entry(op.repo_guid.clone())
            .or_default()
            .insert((op.unix_time_start_ms, op.id));
        self.by_instance
            .entry(op.instance_id.clone())
            .or_default()
            .insert((op.modno, op.id));
        if op.original_id != 0 {
            self.by_original
                .insert((op.instance_id.clone(), op.original_id), op.id);
        }
    }

    fn remove(&mut self, op: &Operation) {
        if let Some(set) = self.by_flow.get_mut(&op.flow_id) {
            set.remove(&op.id);
        }
        if let Some(set) = self.by_repo.get_mut(&op.repo_guid) {
            set.remove(&(op.unix_time_start_ms, op.id));
        }
        if let Some(set) = self.by_instance.get_mut(&op.instance_id) {
            set.remove(&(op.modno, op.id));
        }
        if op.original_id != 0 {
            self.by_original
                .remove(&(op.instance_id.clone(), op.original_id));
        }
    }
}

struct Inner {
    wal: Wal,
    state: OpLogState,
    indexes: Indexes,
    snapshot_path: std::path::PathBuf,
    mutations_since_compact: u64,
}

impl Inner {
    /// Durably record a mutation and update state + indexes.
    fn commit(&mut self, mutation: OpMutation) -> Result<(), OpLogError> {
        self.wal.append_sync(&mutation)?;

        match &mutation {
            OpMutation::Put { op } => {
                if let Some(old) = self.state.ops.get(&op.id) {
                    let old = old.clone();
                    self.indexes.remove(&old);
                }
                self.indexes.insert(op);
            }
            OpMutation::Delete { ids } => {
                for id in ids {
                    if let Some(old) = self.state.ops.get(id) {
                        let old = old.clone();
                        self.indexes.remove(&old);
                    }
                }
            }
        }
        self.state.apply(&mutation);

        self.mutations_since_compact += 1;
        if self.mutations_since_compact >= COMPACT_EVERY_MUTATIONS {
            if let Err(e) = self.compact() {
                // Compaction failure is not fatal; the WAL keeps growing
                warn!(error = %e, "operation log compaction failed");
            }
        }
        Ok(())
    }

    fn compact(&mut self) -> Result<(), OpLogError> {
        let snapshot = OplogSnapshot::new(self.wal.write_seq(), self.state.clone());
        snapshot.save(&self.snapshot_path)?;
        self.wal.reset()?;
        self.mutations_since_compact = 0;
        debug!(seq = snapshot.seq, ops = self.state.ops.len(), "compacted operation log");
        Ok(())
    }
}

/// The durable operation log. Cheap to share via `Arc`.
pub struct OpLog {
    inner: RwLock<Inner>,
    events: broadcast::Sender<OpEvent>,
    /// Count of broadcast change events, for keep-alive idle detection
    event_counter: AtomicU64,
}

impl OpLog {
    /// Open (or create) the log in the given directory.
    ///
    /// Loads the snapshot if present, replays newer WAL entries, rebuilds
    /// the indexes.
    pub fn open(dir: &Path) -> Result<Self, OpLogError> {
        let snapshot_path = dir.join("snapshot.zst");
        let wal_path = dir.join("wal.jsonl");

        let snapshot = OplogSnapshot::load(&snapshot_path)?;
        let (mut wal, entries) = Wal::open(&wal_path)?;

        let (mut state, snap_seq) = match snapshot {
            Some(s) => (s.state, s.seq),
            None => (OpLogState::default(), 0),
        };
        wal.ensure_seq_at_least(snap_seq);

        let mut replayed = 0usize;
        for entry in entries {
            if entry.seq > snap_seq {
                state.apply(&entry.mutation);
                replayed += 1;
            }
        }
        if replayed > 0 {
            debug!(replayed, "replayed WAL entries past snapshot");
        }

        let indexes = Indexes::rebuild(&state);
        let (events, _) = broadcast::channel(SUBSCRIBER_BUFFER);

        Ok(Self {
            inner: RwLock::new(Inner {
                wal,
                state,
                indexes,
                snapshot_path,
                mutations_since_compact: 0,
            }),
            events,
            event_counter: AtomicU64::new(0),
        })
    }

    /// Insert a new operation.
    ///
    /// Assigns `id` and `modno`; an unset `flow_id` becomes the new id
    /// (the first operation of a flow *is* the flow). Returns the stored
    /// record.
    pub fn add(&self, mut op: Operation) -> Result<Operation, OpLogError> {
        let mut inner = self.inner.write();
        op.id = inner.state.next_id;
        op.modno = inner.state.next_modno;
        if op.flow_id == 0 {
            op.flow_id = op.id;
        }
        inner.commit(OpMutation::Put { op: op.clone() })?;
        self.broadcast(OpEvent::Created { op: op.clone() });
        Ok(op)
    }

    /// Replace an existing operation, assigning a fresh `modno`.
    pub fn update(&self, mut op: Operation) -> Result<Operation, OpLogError> {
        let mut inner = self.inner.write();
        if !inner.state.ops.contains_key(&op.id) {
            return Err(OpLogError::NotFound(op.id));
        }
        op.modno = inner.state.next_modno;
        inner.commit(OpMutation::Put { op: op.clone() })?;
        self.broadcast(OpEvent::Updated { op: op.clone() });
        Ok(op)
    }

    /// Fetch one operation by id.
    pub fn get(&self, id: i64) -> Result<Operation, OpLogError> {
        self.inner
            .read()
            .state
            .ops
            .get(&id)
            .cloned()
            .ok_or(OpLogError::NotFound(id))
    }

    /// Iterate matching operations in ascending id order.
    ///
    /// The callback returns `true` to continue, `false` to stop early.
    pub fn query(&self, selector: &OpSelector, mut cb: impl FnMut(&Operation) -> bool) {
        let inner = self.inner.read();
        for id in Self::candidate_ids(&inner, selector) {
            if let Some(op) = inner.state.ops.get(&id) {
                if selector.matches(op) && !cb(op) {
                    return;
                }
            }
        }
    }

    /// Collect matching operations in ascending id order.
    pub fn list(&self, selector: &OpSelector) -> Vec<Operation> {
        let mut out = Vec::new();
        self.query(selector, |op| {
            out.push(op.clone());
            true
        });
        out
    }

    /// The matching operation with the latest start time (ties to higher id).
    pub fn latest(&self, selector: &OpSelector) -> Option<Operation> {
        let mut best: Option<Operation> = None;
        self.query(selector, |op| {
            let better = best.as_ref().is_none_or(|b| {
                (op.unix_time_start_ms, op.id) > (b.unix_time_start_ms, b.id)
            });
            if better {
                best = Some(op.clone());
            }
            true
        });
        best
    }

    /// Delete every matching operation. Returns the number removed.
    pub fn delete(&self, selector: &OpSelector) -> Result<usize, OpLogError> {
        let mut inner = self.inner.write();
        let ids: Vec<i64> = Self::candidate_ids(&inner, selector)
            .into_iter()
            .filter(|id| {
                inner
                    .state
                    .ops
                    .get(id)
                    .is_some_and(|op| selector.matches(op))
            })
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        inner.commit(OpMutation::Delete { ids: ids.clone() })?;
        for id in &ids {
            self.broadcast(OpEvent::Deleted { id: *id });
        }
        Ok(ids.len())
    }

    /// Apply a function to every matching operation.
    ///
    /// Returns how many operations were updated or deleted.
    pub fn transform(
        &self,
        selector: &OpSelector,
        mut f: impl FnMut(&Operation) -> Transformed,
    ) -> Result<usize, OpLogError> {
        let mut inner = self.inner.write();
        let ids = Self::candidate_ids(&inner, selector);
        let mut changed = 0usize;
        for id in ids {
            let Some(op) = inner.state.ops.get(&id) else {
                continue;
            };
            if !selector.matches(op) {
                continue;
            }
            match f(op) {
                Transformed::Keep => {}
                Transformed::Update(mut new_op) => {
                    new_op.id = id;
                    new_op.modno = inner.state.next_modno;
                    inner.commit(OpMutation::Put { op: new_op.clone() })?;
                    self.broadcast(OpEvent::Updated { op: new_op });
                    changed += 1;
                }
                Transformed::Delete => {
                    inner.commit(OpMutation::Delete { ids: vec![id] })?;
                    self.broadcast(OpEvent::Deleted { id });
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    /// Insert or refresh an operation received from a peer.
    ///
    /// The record keeps its foreign `instance_id` and provenance key; its
    /// peer-local ids move into `original_id`/`original_flow_id` and local
    /// ids are assigned. Upserts match on `(instance_id, original_id)`.
    /// Remote operations are never deleted here and never scheduled.
    pub fn apply_remote(&self, remote: Operation) -> Result<Operation, OpLogError> {
        let mut inner = self.inner.write();

        let original_id = if remote.original_id != 0 {
            remote.original_id
        } else {
            remote.id
        };
        let original_flow_id = if remote.original_flow_id != 0 {
            remote.original_flow_id
        } else {
            remote.flow_id
        };
        let key = (remote.instance_id.clone(), original_id);

        if let Some(&local_id) = inner.indexes.by_original.get(&key) {
            let mut op = remote;
            op.id = local_id;
            op.original_id = original_id;
            op.original_flow_id = original_flow_id;
            op.flow_id = inner
                .state
                .ops
                .get(&local_id)
                .map(|existing| existing.flow_id)
                .unwrap_or(local_id);
            op.modno = inner.state.next_modno;
            inner.commit(OpMutation::Put { op: op.clone() })?;
            self.broadcast(OpEvent::Updated { op: op.clone() });
            Ok(op)
        } else {
            let mut op = remote;
            op.id = inner.state.next_id;
            op.modno = inner.state.next_modno;
            op.original_id = original_id;
            op.original_flow_id = original_flow_id;
            // Rejoin the flow if its first operation already arrived
            let flow_key = (op.instance_id.clone(), original_flow_id);
            op.flow_id = inner
                .indexes
                .by_original
                .get(&flow_key)
                .copied()
                .unwrap_or(op.id);
            inner.commit(OpMutation::Put { op: op.clone() })?;
            self.broadcast(OpEvent::Created { op: op.clone() });
            Ok(op)
        }
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<OpEvent> {
        self.events.subscribe()
    }

    /// Force a snapshot + WAL truncation (called on clean shutdown).
    pub fn compact(&self) -> Result<(), OpLogError> {
        self.inner.write().compact()
    }

    /// Number of live operations.
    pub fn len(&self) -> usize {
        self.inner.read().state.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn broadcast(&self, event: OpEvent) {
        if !matches!(event, OpEvent::KeepAlive) {
            self.event_counter.fetch_add(1, Ordering::Relaxed);
        }
        // Send fails only when there are no subscribers
        let _ = self.events.send(event);
    }

    /// Ids that could match the selector, ascending, using the best index.
    fn candidate_ids(inner: &Inner, selector: &OpSelector) -> Vec<i64> {
        if let Some(ids) = &selector.ids {
            let mut ids = ids.clone();
            ids.sort_unstable();
            return ids;
        }
        if let Some(flow_id) = selector.flow_id {
            return inner
                .indexes
                .by_flow
                .get(&flow_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
        }
        if let Some(guid) = &selector.repo_guid {
            let Some(set) = inner.indexes.by_repo.get(guid) else {
                return Vec::new();
            };
            let lower = selector.started_after_ms.unwrap_or(i64::MIN);
            let upper = selector.started_before_ms.unwrap_or(i64::MAX);
            if lower > upper {
                return Vec::new();
            }
            let mut ids: Vec<i64> = set
                .range((lower, i64::MIN)..(upper, i64::MIN))
                .map(|(_, id)| *id)
                .collect();
            ids.sort_unstable();
            return ids;
        }
        inner.state.ops.keys().copied().collect()
    }
}

/// Emit `KeepAlive` on the subscription stream when the log has been idle
/// for [`KEEP_ALIVE_INTERVAL`], so long-lived observer streams can
/// heartbeat. Runs until aborted.
pub fn spawn_keepalive(log: &Arc<OpLog>) -> tokio::task::JoinHandle<()> {
    let log = Arc::clone(log);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;
        let mut seen = log.event_counter.load(Ordering::Relaxed);
        loop {
            ticker.tick().await;
            let current = log.event_counter.load(Ordering::Relaxed);
            if current == seen {
                log.broadcast(OpEvent::KeepAlive);
            }
            seen = current;
        }
    })
}

#[cfg(test)]
#[path = "oplog_tests.rs"]
mod tests;
