// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boot recovery and data-directory ownership.

use backrest_core::{InstanceId, OpSelector, OpStatus};
use backrest_storage::{OpLog, Transformed};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Take the exclusive data-directory lock, writing our pid into it.
///
/// Returns the held lock file; dropping it releases the directory. Fails
/// when another daemon already owns the directory.
pub fn acquire_data_dir_lock(lock_path: &Path) -> std::io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?;
    file.try_lock_exclusive()?;
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(file)
}

/// Rewrite operations this instance left unfinished to system_cancelled.
///
/// Runs before the scheduler: an operation that claims to be pending or
/// in progress after a restart has no owning task anymore, so its state
/// is a lie until corrected. Returns how many were rewritten.
pub fn recover_interrupted_operations(oplog: &OpLog, instance: &InstanceId) -> usize {
    let selector = OpSelector::all()
        .with_instance_id(instance.clone())
        .with_statuses(vec![OpStatus::Pending, OpStatus::InProgress]);
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;

    let result = oplog.transform(&selector, |op| {
        let mut updated = op.clone();
        updated.status = OpStatus::SystemCancelled;
        updated.unix_time_end_ms = now.max(op.unix_time_start_ms);
        updated.display_message = "interrupted by restart".to_string();
        Transformed::Update(updated)
    });
    match result {
        Ok(rewritten) => {
            if rewritten > 0 {
                info!(rewritten, "recovered interrupted operations");
            }
            rewritten
        }
        Err(e) => {
            warn!(error = %e, "boot recovery failed");
            0
        }
    }
}

/// Rotate an oversized process log aside so the new run starts fresh.
pub fn rotate_log_if_needed(path: &Path, max_bytes: u64) {
    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };
    if metadata.len() <= max_bytes {
        return;
    }
    let rotated = path.with_extension("log.old");
    if let Err(e) = std::fs::rename(path, &rotated) {
        warn!(error = %e, path = %path.display(), "failed to rotate process log");
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
