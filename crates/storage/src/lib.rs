// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! backrest-storage: the operation log and the per-task log store

mod logstore;
mod migration;
mod oplog;
mod snapshot;
mod wal;

pub use logstore::{LogStore, LogStoreError, LogWriter};
pub use migration::{Migration, MigrationError, MigrationRegistry};
pub use oplog::{spawn_keepalive, OpLog, OpLogError, OpLogState, Transformed, KEEP_ALIVE_INTERVAL};
pub use snapshot::{OplogSnapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use wal::{OpMutation, Wal, WalEntry, WalError};
