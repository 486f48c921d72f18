// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{Plan, Repo};
use backrest_core::{InstanceId, PlanId, RepoId};

fn sample() -> Config {
    Config {
        modno: 3,
        instance: InstanceId::new("inst"),
        repos: vec![Repo {
            id: RepoId::new("r1"),
            guid: "guid-r1".into(),
            uri: "/srv/backups".into(),
            password: "pw".into(),
            ..Default::default()
        }],
        plans: vec![Plan {
            id: PlanId::new("p1"),
            repo: RepoId::new("r1"),
            paths: vec!["/home".into()],
            ..Default::default()
        }],
    }
}

#[test]
fn lookup_helpers_find_by_id() {
    let cfg = sample();
    assert!(cfg.get_repo(&RepoId::new("r1")).is_some());
    assert!(cfg.get_repo(&RepoId::new("r2")).is_none());
    assert_eq!(
        cfg.repo_for_plan(&PlanId::new("p1")).unwrap().id,
        RepoId::new("r1")
    );
    assert_eq!(cfg.plans_for_repo(&RepoId::new("r1")).count(), 1);
}

#[test]
fn config_round_trips_through_json() {
    let cfg = sample();
    let json = serde_json::to_string_pretty(&cfg).unwrap();
    let back: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(back, cfg);
}

#[test]
fn unknown_fields_default_cleanly() {
    let cfg: Config = serde_json::from_str(r#"{"instance": "x"}"#).unwrap();
    assert_eq!(cfg.modno, 0);
    assert!(cfg.repos.is_empty());
}
