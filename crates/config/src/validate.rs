// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration validation
//!
//! All rules are checked in one pass; the caller gets every problem at
//! once rather than fixing them one at a time.

use crate::template::{check_vocabulary, HOOK_VOCABULARY};
use crate::{parse_within, Config, Hook, RetentionPolicy};
use std::collections::HashSet;
use thiserror::Error;

/// A configuration rejected by validation, with every violation listed.
#[derive(Debug, Error)]
#[error("invalid configuration:\n{}", .problems.join("\n"))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

/// Validate a configuration document.
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    let mut problems = Vec::new();

    if config.instance.is_empty() {
        problems.push("instance id must not be empty".to_string());
    }

    let mut repo_ids = HashSet::new();
    for repo in &config.repos {
        let ctx = format!("repo {:?}", repo.id.as_str());
        if repo.id.is_empty() {
            problems.push("repo id must not be empty".to_string());
        }
        if !repo_ids.insert(repo.id.clone()) {
            problems.push(format!("{ctx}: duplicate repo id"));
        }
        if repo.guid.is_empty() {
            problems.push(format!("{ctx}: guid must be assigned before saving"));
        }
        if repo.uri.is_empty() {
            problems.push(format!("{ctx}: uri must not be empty"));
        }
        if repo.password.is_empty() {
            problems.push(format!("{ctx}: password must not be empty"));
        }
        if let Some(prune) = &repo.prune_policy {
            if let Err(e) = prune.schedule.check() {
                problems.push(format!("{ctx}: prune schedule: {e}"));
            }
        }
        if let Some(check) = &repo.check_policy {
            if let Err(e) = check.schedule.check() {
                problems.push(format!("{ctx}: check schedule: {e}"));
            }
        }
        check_hooks(&repo.hooks, &ctx, &mut problems);
    }

    let mut plan_ids = HashSet::new();
    for plan in &config.plans {
        let ctx = format!("plan {:?}", plan.id.as_str());
        if plan.id.is_empty() {
            problems.push("plan id must not be empty".to_string());
        }
        if !plan_ids.insert(plan.id.clone()) {
            problems.push(format!("{ctx}: duplicate plan id"));
        }
        if !repo_ids.contains(&plan.repo) {
            problems.push(format!(
                "{ctx}: references unknown repo {:?}",
                plan.repo.as_str()
            ));
        }
        if plan.paths.is_empty() {
            problems.push(format!("{ctx}: must back up at least one path"));
        }
        if let Err(e) = plan.schedule.check() {
            problems.push(format!("{ctx}: schedule: {e}"));
        }
        if let RetentionPolicy::KeepByTime {
            within: Some(within),
            ..
        } = &plan.retention
        {
            if let Err(e) = parse_within(within) {
                problems.push(format!("{ctx}: retention: {e}"));
            }
        }
        check_hooks(&plan.hooks, &ctx, &mut problems);
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { problems })
    }
}

fn check_hooks(hooks: &[Hook], ctx: &str, problems: &mut Vec<String>) {
    for (i, hook) in hooks.iter().enumerate() {
        if hook.conditions.is_empty() {
            problems.push(format!("{ctx}: hook #{i} has no conditions"));
        }
        if let Err(e) = check_vocabulary(hook.action.template(), HOOK_VOCABULARY) {
            problems.push(format!("{ctx}: hook #{i}: {e}"));
        }
    }
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
