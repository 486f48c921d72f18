// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{HookAction, HookCondition, Plan, Repo, Schedule, ScheduleClock};
use backrest_core::{InstanceId, PlanId, RepoGuid, RepoId};

fn repo(id: &str) -> Repo {
    Repo {
        id: RepoId::new(id),
        guid: RepoGuid::new(format!("guid-{id}")),
        uri: format!("/backups/{id}"),
        password: "secret".to_string(),
        ..Default::default()
    }
}

fn plan(id: &str, repo: &str) -> Plan {
    Plan {
        id: PlanId::new(id),
        repo: RepoId::new(repo),
        paths: vec!["/data".to_string()],
        ..Default::default()
    }
}

fn valid_config() -> Config {
    Config {
        modno: 0,
        instance: InstanceId::new("test-instance"),
        repos: vec![repo("r1")],
        plans: vec![plan("p1", "r1")],
    }
}

#[test]
fn valid_config_passes() {
    assert!(validate(&valid_config()).is_ok());
}

#[test]
fn empty_repo_fields_are_each_reported() {
    let mut cfg = valid_config();
    cfg.repos[0].uri = String::new();
    cfg.repos[0].password = String::new();
    let err = validate(&cfg).unwrap_err();
    assert_eq!(err.problems.len(), 2);
    assert!(err.problems.iter().any(|p| p.contains("uri")));
    assert!(err.problems.iter().any(|p| p.contains("password")));
}

#[test]
fn missing_guid_is_rejected() {
    let mut cfg = valid_config();
    cfg.repos[0].guid = RepoGuid::default();
    assert!(validate(&cfg).is_err());
}

#[test]
fn duplicate_ids_are_rejected() {
    let mut cfg = valid_config();
    cfg.repos.push(repo("r1"));
    cfg.plans.push(plan("p1", "r1"));
    let err = validate(&cfg).unwrap_err();
    assert!(err.problems.iter().any(|p| p.contains("duplicate repo id")));
    assert!(err.problems.iter().any(|p| p.contains("duplicate plan id")));
}

#[test]
fn plan_referencing_unknown_repo_is_rejected() {
    let mut cfg = valid_config();
    cfg.plans[0].repo = RepoId::new("nope");
    let err = validate(&cfg).unwrap_err();
    assert!(err.problems[0].contains("unknown repo"));
}

#[test]
fn bad_cron_expression_is_rejected() {
    let mut cfg = valid_config();
    cfg.plans[0].schedule = Schedule::cron("nonsense", ScheduleClock::Utc);
    let err = validate(&cfg).unwrap_err();
    assert!(err.problems[0].contains("cron"));
}

#[test]
fn bad_retention_within_is_rejected() {
    let mut cfg = valid_config();
    cfg.plans[0].retention = RetentionPolicy::KeepByTime {
        hourly: 0,
        daily: 7,
        weekly: 0,
        monthly: 0,
        yearly: 0,
        within: Some("5w".to_string()),
    };
    let err = validate(&cfg).unwrap_err();
    assert!(err.problems[0].contains("unknown unit"));
}

#[test]
fn hook_with_unknown_template_variable_is_rejected() {
    let mut cfg = valid_config();
    cfg.plans[0].hooks.push(crate::Hook {
        conditions: vec![HookCondition::SnapshotError],
        action: HookAction::Command {
            script: "notify ${no_such_var}".to_string(),
        },
        on_error: Default::default(),
    });
    let err = validate(&cfg).unwrap_err();
    assert!(err.problems[0].contains("no_such_var"));
}

#[test]
fn hook_without_conditions_is_rejected() {
    let mut cfg = valid_config();
    cfg.repos[0].hooks.push(crate::Hook {
        conditions: vec![],
        action: HookAction::Command {
            script: "true".to_string(),
        },
        on_error: Default::default(),
    });
    let err = validate(&cfg).unwrap_err();
    assert!(err.problems[0].contains("no conditions"));
}
