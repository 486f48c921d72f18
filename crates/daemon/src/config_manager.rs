// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration load/validate/save with hot-reload notification.
//!
//! The manager owns the canonical `Config`. Writers present the modno they
//! read; a stale modno is rejected so concurrent editors cannot clobber
//! each other. Accepted configurations are persisted atomically (tmp +
//! rename + fsync) and pushed to subscribers over a watch channel.

use backrest_config::{validate, Config, Repo, ValidationError};
use backrest_core::{OpSelector, RepoGuid};
use backrest_storage::{OpLog, OpLogError};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

/// Errors from configuration management
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("stale config revision: expected modno {expected}, got {got}")]
    StaleModno { expected: i64, got: i64 },
    #[error("repo {0} not found")]
    RepoNotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    OpLog(#[from] OpLogError),
}

/// Owner of the declarative configuration.
pub struct ConfigManager {
    path: PathBuf,
    tx: watch::Sender<Arc<Config>>,
}

impl ConfigManager {
    /// Load the config file, or create a default one if none exists.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let raw = fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&raw)?;
            validate(&config)?;
            config
        } else {
            let config = Config {
                modno: 0,
                instance: format!("backrest-{}", &uuid::Uuid::new_v4().to_string()[..8]).into(),
                repos: vec![],
                plans: vec![],
            };
            persist(path, &config)?;
            info!(path = %path.display(), instance = %config.instance, "created default config");
            config
        };
        let (tx, _) = watch::channel(Arc::new(config));
        Ok(Self {
            path: path.to_owned(),
            tx,
        })
    }

    pub fn current(&self) -> Arc<Config> {
        self.tx.borrow().clone()
    }

    /// Watch channel delivering every accepted configuration.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.tx.subscribe()
    }

    /// Replace the configuration.
    ///
    /// `new.modno` must equal the current modno (compare-and-swap); the
    /// accepted config carries modno + 1. New repos get guids; a changed
    /// uri means different storage, which forces a fresh guid.
    pub fn set(&self, mut new: Config) -> Result<Arc<Config>, ConfigError> {
        let current = self.current();
        if new.modno != current.modno {
            return Err(ConfigError::StaleModno {
                expected: current.modno,
                got: new.modno,
            });
        }
        if new.instance.is_empty() {
            new.instance = current.instance.clone();
        }

        for repo in &mut new.repos {
            let existing = current.repos.iter().find(|r| r.id == repo.id);
            match existing {
                Some(existing) if existing.uri == repo.uri => {
                    // Guid is immutable; ignore whatever the caller sent
                    repo.guid = existing.guid.clone();
                }
                _ => {
                    // New repo, or a uri change pointing at new storage
                    repo.guid = RepoGuid::new(uuid::Uuid::new_v4().to_string());
                }
            }
        }

        validate(&new)?;
        new.modno = current.modno + 1;
        persist(&self.path, &new)?;

        let accepted = Arc::new(new);
        let _ = self.tx.send(Arc::clone(&accepted));
        info!(modno = accepted.modno, "configuration updated");
        Ok(accepted)
    }

    /// Add one repo to the current configuration.
    pub fn add_repo(&self, repo: Repo) -> Result<Arc<Config>, ConfigError> {
        let mut new = (*self.current()).clone();
        new.repos.push(repo);
        self.set(new)
    }

    /// Remove a repo and cascade-delete its operations.
    ///
    /// The repository contents on disk are untouched; only the local
    /// records go.
    pub fn remove_repo(&self, id: &str, oplog: &OpLog) -> Result<Arc<Config>, ConfigError> {
        let mut new = (*self.current()).clone();
        let repo = new
            .repos
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| ConfigError::RepoNotFound(id.to_string()))?;
        new.repos.retain(|r| r.id != id);
        new.plans.retain(|p| p.repo != id);
        let accepted = self.set(new)?;

        let removed = oplog.delete(&OpSelector::all().with_repo_guid(repo.guid.clone()))?;
        info!(repo = id, removed, "cascade-deleted operations for removed repo");
        Ok(accepted)
    }
}

/// Write a config atomically: tmp file, fsync, rename.
fn persist(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(config)?.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "config_manager_tests.rs"]
mod tests;
