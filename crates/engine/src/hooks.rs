// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The hook pipeline.
//!
//! Hooks run as straight-line sequential awaits inside the runner's
//! context: evaluate conditions, execute the action, record a Run-Hook
//! operation in the triggering flow, apply the failure policy. Command
//! hooks expand the template vocabulary and run under `sh -c` with a
//! scrubbed environment; notifier hooks render their template and go out
//! through the notifier adapter.

use backrest_adapters::subprocess::{run_with_timeout, HOOK_COMMAND_TIMEOUT};
use backrest_adapters::{NotifyMessage, Notifier};
use backrest_config::template::{
    format_duration, format_size_bytes, format_time, interpolate, interpolate_shell,
};
use backrest_config::{Hook, HookAction, HookCondition, OnError, Repo};
use backrest_core::{Clock, OpPayload, OpStatus, Operation};
use backrest_storage::{LogStore, OpLog};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How the surrounding task must proceed after the pipeline ran.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// All hooks done (failures recorded per IGNORE policy).
    Continue,
    /// A CANCEL-policy hook failed: terminate with user_cancelled.
    Cancel,
    /// A FATAL-policy hook failed: terminate with error.
    Fail,
    /// A RETRY-policy hook failed: requeue the task after this delay.
    Retry(Duration),
}

/// The triggering context hooks observe.
pub struct HookEvent<'a> {
    /// Conditions this lifecycle point raises (e.g. error + any_error).
    pub conditions: &'a [HookCondition],
    /// Snapshot of the triggering operation.
    pub op: &'a Operation,
    pub repo: &'a Repo,
    pub error: Option<&'a str>,
}

/// Executes hooks for one task execution.
pub struct HookPipeline<C: Clock> {
    oplog: Arc<OpLog>,
    logstore: Arc<LogStore>,
    notifier: Arc<dyn Notifier>,
    clock: C,
}

impl<C: Clock> HookPipeline<C> {
    pub fn new(
        oplog: Arc<OpLog>,
        logstore: Arc<LogStore>,
        notifier: Arc<dyn Notifier>,
        clock: C,
    ) -> Self {
        Self {
            oplog,
            logstore,
            notifier,
            clock,
        }
    }

    /// Run every matching hook in declared order.
    ///
    /// `hooks` is the combined repo + plan hook list. Stops early when a
    /// failing hook's policy says so.
    pub async fn fire(
        &self,
        hooks: &[Hook],
        event: &HookEvent<'_>,
        cancel: &CancellationToken,
    ) -> HookOutcome {
        for hook in hooks {
            let Some(condition) = event
                .conditions
                .iter()
                .copied()
                .find(|c| hook.fires_on(*c))
            else {
                continue;
            };

            let mut hook_op = self.hook_operation(hook, condition, event);
            hook_op = match self.oplog.add(hook_op) {
                Ok(op) => op,
                Err(e) => {
                    warn!(error = %e, "failed to record hook operation");
                    continue;
                }
            };

            // Scope the action future so its borrow of hook_op ends
            // before finalization
            let result = {
                let action = self.run_action(&hook.action, condition, event, &mut hook_op);
                tokio::pin!(action);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = &mut action => Some(result),
                }
            };
            let Some(result) = result else {
                self.finalize(hook_op, OpStatus::UserCancelled, "cancelled".to_string());
                return HookOutcome::Cancel;
            };

            match result {
                Ok(()) => {
                    self.finalize(hook_op, OpStatus::Success, String::new());
                }
                Err(message) => {
                    debug!(
                        condition = %condition,
                        policy = ?hook.on_error,
                        error = %message,
                        "hook failed"
                    );
                    self.finalize(hook_op, OpStatus::Error, message.clone());
                    match hook.on_error {
                        OnError::Ignore => {}
                        OnError::Cancel => return HookOutcome::Cancel,
                        OnError::Fatal => {
                            self.emit_fatal_warning(hook, condition, event, &message);
                            return HookOutcome::Fail;
                        }
                        OnError::Retry1Min | OnError::Retry10Min => {
                            // retry_delay is Some for these variants
                            let delay = hook
                                .on_error
                                .retry_delay()
                                .unwrap_or(Duration::from_secs(60));
                            return HookOutcome::Retry(delay);
                        }
                    }
                }
            }
        }
        HookOutcome::Continue
    }

    fn hook_operation(
        &self,
        hook: &Hook,
        condition: HookCondition,
        event: &HookEvent<'_>,
    ) -> Operation {
        Operation {
            id: 0,
            modno: 0,
            instance_id: event.op.instance_id.clone(),
            original_instance_keyid: String::new(),
            original_id: 0,
            original_flow_id: 0,
            repo_id: event.repo.id.clone(),
            repo_guid: event.repo.guid.clone(),
            plan_id: event.op.plan_id.clone(),
            flow_id: event.op.flow_id,
            snapshot_id: event.op.snapshot_id.clone(),
            unix_time_start_ms: self.clock.epoch_ms(),
            unix_time_end_ms: 0,
            status: OpStatus::InProgress,
            display_message: String::new(),
            logref: None,
            payload: OpPayload::RunHook {
                name: hook.action.kind().to_string(),
                condition: condition.as_str().to_string(),
            },
        }
    }

    async fn run_action(
        &self,
        action: &HookAction,
        condition: HookCondition,
        event: &HookEvent<'_>,
        hook_op: &mut Operation,
    ) -> Result<(), String> {
        let vars = hook_vars(condition, event);
        match action {
            HookAction::Command { script } => {
                let expanded = interpolate_shell(script, &vars);
                self.run_command_hook(&expanded, hook_op).await
            }
            _ => {
                let body = interpolate(action.template(), &vars);
                let message = NotifyMessage {
                    title: format!("backrest: {condition}"),
                    body,
                    success: !is_failure_condition(condition),
                };
                self.notifier
                    .send(action, &message)
                    .await
                    .map_err(|e| e.to_string())
            }
        }
    }

    async fn run_command_hook(
        &self,
        script: &str,
        hook_op: &mut Operation,
    ) -> Result<(), String> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script).env_clear();
        for key in ["PATH", "HOME"] {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }

        let output = run_with_timeout(cmd, HOOK_COMMAND_TIMEOUT, "hook command").await?;

        // Keep the transcript whatever the outcome
        if let Ok((mut writer, refid)) = self.logstore.create() {
            let _ = writer.append(&output.stdout);
            let _ = writer.append(&output.stderr);
            let _ = writer.close();
            hook_op.logref = Some(refid);
        }

        if output.status.success() {
            Ok(())
        } else {
            let tail = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "hook exited with {}: {}",
                output.status.code().unwrap_or(-1),
                truncate_tail(tail.trim(), 250)
            ))
        }
    }

    fn finalize(&self, mut hook_op: Operation, status: OpStatus, message: String) {
        hook_op.status = status;
        hook_op.unix_time_end_ms = self.clock.epoch_ms();
        hook_op.display_message = message;
        if let Err(e) = self.oplog.update(hook_op) {
            warn!(error = %e, "failed to finalize hook operation");
        }
    }

    /// FATAL policies emit a warning operation alongside the failed hook.
    fn emit_fatal_warning(
        &self,
        hook: &Hook,
        condition: HookCondition,
        event: &HookEvent<'_>,
        message: &str,
    ) {
        let mut warning = self.hook_operation(hook, condition, event);
        warning.status = OpStatus::Warning;
        warning.unix_time_end_ms = self.clock.epoch_ms();
        warning.display_message = format!("fatal hook failure aborted the task: {message}");
        if let Err(e) = self.oplog.add(warning) {
            warn!(error = %e, "failed to record fatal-hook warning");
        }
    }
}

/// The template vocabulary for one firing.
fn hook_vars(condition: HookCondition, event: &HookEvent<'_>) -> HashMap<String, String> {
    let op = event.op;
    let mut vars = HashMap::new();
    vars.insert("event".to_string(), condition.as_str().to_string());
    vars.insert("repo_id".to_string(), event.repo.id.to_string());
    vars.insert("plan_id".to_string(), op.plan_id.to_string());
    vars.insert("snapshot_id".to_string(), op.snapshot_id.clone());
    vars.insert("status".to_string(), op.status.to_string());
    vars.insert(
        "error".to_string(),
        event.error.unwrap_or_default().to_string(),
    );
    vars.insert(
        "start_time".to_string(),
        format_time(op.unix_time_start_ms),
    );
    let duration_ms = if op.unix_time_end_ms > 0 {
        op.unix_time_end_ms - op.unix_time_start_ms
    } else {
        0
    };
    vars.insert("duration".to_string(), format_duration(duration_ms));

    let (summary, bytes_added, files_processed) = match &op.payload {
        OpPayload::Backup {
            summary: Some(s), ..
        } => (
            serde_json::to_string(s).unwrap_or_default(),
            s.data_added,
            s.total_files_processed,
        ),
        _ => (String::new(), 0, 0),
    };
    vars.insert("summary".to_string(), summary);
    vars.insert(
        "bytes_added".to_string(),
        format_size_bytes(bytes_added),
    );
    vars.insert("files_processed".to_string(), files_processed.to_string());
    vars
}

fn is_failure_condition(condition: HookCondition) -> bool {
    matches!(
        condition,
        HookCondition::SnapshotError
            | HookCondition::SnapshotWarning
            | HookCondition::AnyError
    )
}

fn truncate_tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = s.len() - max;
    while !s.is_char_boundary(cut) {
        cut += 1;
    }
    s[cut..].to_string()
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod tests;
