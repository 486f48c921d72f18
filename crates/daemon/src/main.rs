// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! backrest daemon (backrestd)
//!
//! Long-running supervisor that owns the data directory, the operation
//! log, and the scheduler loop driving the backup tool.
//!
//! Exit codes: 0 ok, 1 configuration invalid, 2 backup binary missing,
//! 3 data directory unwritable.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use backrest_adapters::{ResticDriver, WebhookNotifier};
use backrest_core::SystemClock;
use backrest_daemon::{
    acquire_data_dir_lock, recover_interrupted_operations, resolve_binary, ConfigManager, Env,
};
use backrest_engine::{Orchestrator, OrchestratorDeps, DRAIN_DEADLINE};
use backrest_storage::{spawn_keepalive, LogStore, OpLog};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

const EXIT_CONFIG_INVALID: u8 = 1;
const EXIT_BINARY_MISSING: u8 = 2;
const EXIT_DATA_DIR_UNWRITABLE: u8 = 3;

/// Rotate the process log once it exceeds this size.
const MAX_PROCESS_LOG_BYTES: u64 = 8 * 1024 * 1024;

#[tokio::main]
async fn main() -> ExitCode {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("backrestd {}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            "--help" | "-h" | "help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: backrestd [--help | --version]");
                return ExitCode::from(EXIT_CONFIG_INVALID);
            }
        }
    }

    let env = Env::resolve();

    // The data directory must exist and be ours before anything else
    if let Err(e) = std::fs::create_dir_all(&env.data_dir) {
        eprintln!(
            "error: data directory {} is unwritable: {e}",
            env.data_dir.display()
        );
        return ExitCode::from(EXIT_DATA_DIR_UNWRITABLE);
    }
    let _lock = match acquire_data_dir_lock(&env.lock_path()) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!(
                "error: cannot lock data directory {} (another backrestd running?): {e}",
                env.data_dir.display()
            );
            return ExitCode::from(EXIT_DATA_DIR_UNWRITABLE);
        }
    };

    let config_manager = match ConfigManager::load_or_init(&env.config_path) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("error: invalid configuration: {e}");
            return ExitCode::from(EXIT_CONFIG_INVALID);
        }
    };

    let binary = match resolve_binary(&env) {
        Ok(binary) => binary,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_BINARY_MISSING);
        }
    };

    let _log_guard = match setup_logging(&env) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!(
                "error: cannot write process logs under {}: {e}",
                env.data_dir.display()
            );
            return ExitCode::from(EXIT_DATA_DIR_UNWRITABLE);
        }
    };

    info!(
        data_dir = %env.data_dir.display(),
        config = %env.config_path.display(),
        binary = %binary.display(),
        port = env.port,
        "backrestd starting"
    );

    let oplog = match OpLog::open(&env.oplog_dir()) {
        Ok(oplog) => Arc::new(oplog),
        Err(e) => {
            error!(error = %e, "cannot open operation log");
            return ExitCode::from(EXIT_DATA_DIR_UNWRITABLE);
        }
    };
    let logstore = match LogStore::open(env.tasklogs_dir()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "cannot open task log store");
            return ExitCode::from(EXIT_DATA_DIR_UNWRITABLE);
        }
    };

    // Anything still claiming to run died with the previous process
    let instance = config_manager.current().instance.clone();
    recover_interrupted_operations(&oplog, &instance);

    let keepalive = spawn_keepalive(&oplog);

    let orchestrator = Orchestrator::new(OrchestratorDeps {
        oplog: Arc::clone(&oplog),
        logstore,
        driver: Arc::new(ResticDriver::new()),
        notifier: Arc::new(WebhookNotifier::new()),
        clock: SystemClock,
        binary,
        config_rx: config_manager.subscribe(),
    });

    let loop_handle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run().await })
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");

    orchestrator.shutdown(DRAIN_DEADLINE).await;
    keepalive.abort();
    let _ = loop_handle.await;

    if let Err(e) = oplog.compact() {
        error!(error = %e, "final compaction failed");
    }
    info!("backrestd stopped");
    ExitCode::SUCCESS
}

fn print_help() {
    println!("backrestd {}", env!("CARGO_PKG_VERSION"));
    println!("Backup orchestrator daemon driving the restic binary.");
    println!();
    println!("USAGE:");
    println!("    backrestd");
    println!();
    println!("ENVIRONMENT:");
    println!("    BACKREST_DATA             data directory root");
    println!("    BACKREST_CONFIG           config file path");
    println!("    BACKREST_PORT             RPC listen port");
    println!("    BACKREST_RESTIC_COMMAND   absolute path to the backup binary");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Print help information");
    println!("    -v, --version    Print version information");
}

fn setup_logging(
    env: &Env,
) -> Result<tracing_appender::non_blocking::WorkerGuard, std::io::Error> {
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(env.processlogs_dir())?;
    let log_path = env.processlogs_dir().join("backrestd.log");
    backrest_daemon::lifecycle::rotate_log_if_needed(&log_path, MAX_PROCESS_LOG_BYTES);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot install SIGINT handler");
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
