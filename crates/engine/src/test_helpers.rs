// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests

use crate::{Orchestrator, OrchestratorDeps};
use backrest_adapters::{FakeDriver, FakeNotifier};
use backrest_config::{Config, Hook, Plan, Repo, RetentionPolicy};
use backrest_core::{Operation, SystemClock};
use backrest_storage::{LogStore, OpLog};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub fn test_repo() -> Repo {
    Repo {
        id: "r1".into(),
        guid: "guid-r1".into(),
        uri: "/srv/backups/r1".into(),
        password: "secret".into(),
        ..Default::default()
    }
}

pub fn test_plan(paths: Vec<String>) -> Plan {
    Plan {
        id: "p1".into(),
        repo: "r1".into(),
        paths,
        retention: RetentionPolicy::KeepLastN { count: 100 },
        ..Default::default()
    }
}

pub fn test_config(paths: Vec<String>) -> Config {
    Config {
        modno: 1,
        instance: "test-instance".into(),
        repos: vec![test_repo()],
        plans: vec![test_plan(paths)],
    }
}

/// A running orchestrator over fakes, plus handles to observe it.
pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub oplog: Arc<OpLog>,
    pub logstore: Arc<LogStore>,
    pub driver: FakeDriver,
    pub notifier: FakeNotifier,
    pub config_tx: watch::Sender<Arc<Config>>,
    pub orchestrator: Arc<Orchestrator<SystemClock>>,
}

impl TestEnv {
    pub async fn start(config: Config) -> Self {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let oplog = Arc::new(OpLog::open(&dir.path().join("oplog")).expect("oplog"));
        let logstore = Arc::new(LogStore::open(dir.path().join("tasklogs")).expect("logstore"));
        let driver = FakeDriver::new();
        let notifier = FakeNotifier::new();
        let (config_tx, config_rx) = watch::channel(Arc::new(config));

        let orchestrator = Orchestrator::new(OrchestratorDeps {
            oplog: Arc::clone(&oplog),
            logstore: Arc::clone(&logstore),
            driver: Arc::new(driver.clone()),
            notifier: Arc::new(notifier.clone()),
            clock: SystemClock,
            binary: PathBuf::from("/nonexistent/restic"),
            config_rx,
        });

        {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.run().await });
        }

        Self {
            dir,
            oplog,
            logstore,
            driver,
            notifier,
            config_tx,
            orchestrator,
        }
    }

    pub fn ops(&self) -> Vec<Operation> {
        self.oplog.list(&backrest_core::OpSelector::all())
    }

    /// Poll the log until the predicate holds (or panic after 10s).
    pub async fn wait_ops(
        &self,
        description: &str,
        predicate: impl Fn(&[Operation]) -> bool,
    ) -> Vec<Operation> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let ops = self.ops();
            if predicate(&ops) {
                return ops;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for {description}; ops: {ops:#?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub fn command_hook(conditions: Vec<backrest_config::HookCondition>, script: &str) -> Hook {
    Hook {
        conditions,
        action: backrest_config::HookAction::Command {
            script: script.to_string(),
        },
        on_error: Default::default(),
    }
}
