// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment and data-directory resolution.
//!
//! Recognized variables: `BACKREST_DATA` (data root), `BACKREST_CONFIG`
//! (config path), `BACKREST_PORT` (RPC listen), `BACKREST_RESTIC_COMMAND`
//! (binary override), plus the XDG base-directory conventions.

use std::path::PathBuf;

pub const ENV_DATA: &str = "BACKREST_DATA";
pub const ENV_CONFIG: &str = "BACKREST_CONFIG";
pub const ENV_PORT: &str = "BACKREST_PORT";
pub const ENV_RESTIC_COMMAND: &str = "BACKREST_RESTIC_COMMAND";

const DEFAULT_PORT: u16 = 9898;

/// Resolved paths and listen settings for one daemon process.
#[derive(Debug, Clone)]
pub struct Env {
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub port: u16,
}

impl Env {
    /// Resolve from the process environment, falling back to XDG dirs.
    pub fn resolve() -> Self {
        let data_dir = std::env::var(ENV_DATA)
            .map(PathBuf::from)
            .ok()
            .or_else(|| {
                std::env::var("XDG_DATA_HOME")
                    .map(|base| PathBuf::from(base).join("backrest"))
                    .ok()
            })
            .or_else(|| dirs::data_dir().map(|base| base.join("backrest")))
            .unwrap_or_else(|| PathBuf::from(".backrest"));

        let config_path = std::env::var(ENV_CONFIG)
            .map(PathBuf::from)
            .ok()
            .or_else(|| {
                std::env::var("XDG_CONFIG_HOME")
                    .map(|base| PathBuf::from(base).join("backrest/config.json"))
                    .ok()
            })
            .or_else(|| dirs::config_dir().map(|base| base.join("backrest/config.json")))
            .unwrap_or_else(|| data_dir.join("config.json"));

        let port = std::env::var(ENV_PORT)
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            data_dir,
            config_path,
            port,
        }
    }

    pub fn oplog_dir(&self) -> PathBuf {
        self.data_dir.join("oplog")
    }

    pub fn tasklogs_dir(&self) -> PathBuf {
        self.data_dir.join("tasklogs")
    }

    pub fn processlogs_dir(&self) -> PathBuf {
        self.data_dir.join("processlogs")
    }

    pub fn restic_dir(&self) -> PathBuf {
        self.data_dir.join("restic")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("daemon.lock")
    }
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
