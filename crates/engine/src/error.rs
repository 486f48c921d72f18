// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine

use backrest_storage::{LogStoreError, OpLogError};
use thiserror::Error;

/// Errors surfaced by the orchestration engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("plan not found: {0}")]
    PlanNotFound(String),
    #[error("repo not found: {0}")]
    RepoNotFound(String),
    #[error("operation not found: {0}")]
    OperationNotFound(i64),
    #[error("operation {0} is not cancellable")]
    NotCancellable(i64),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    OpLog(#[from] OpLogError),
    #[error(transparent)]
    LogStore(#[from] LogStoreError),
}
