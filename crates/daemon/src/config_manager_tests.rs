// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use backrest_config::Plan;
use tempfile::TempDir;

fn repo(id: &str, uri: &str) -> Repo {
    Repo {
        id: id.into(),
        guid: Default::default(),
        uri: uri.into(),
        password: "pw".into(),
        ..Default::default()
    }
}

fn manager(dir: &TempDir) -> ConfigManager {
    ConfigManager::load_or_init(&dir.path().join("config.json")).unwrap()
}

#[test]
fn init_creates_a_default_config_with_an_instance_id() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    let manager = ConfigManager::load_or_init(&path).unwrap();
    assert!(path.exists());
    assert!(!manager.current().instance.is_empty());

    // Reload round-trips it
    let again = ConfigManager::load_or_init(&path).unwrap();
    assert_eq!(again.current().instance, manager.current().instance);
}

#[test]
fn set_round_trips_and_bumps_modno() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir);

    let mut new = (*manager.current()).clone();
    new.repos.push(repo("r1", "/srv/backups"));
    new.plans.push(Plan {
        id: "p1".into(),
        repo: "r1".into(),
        paths: vec!["/data".into()],
        ..Default::default()
    });
    let accepted = manager.set(new.clone()).unwrap();

    assert_eq!(accepted.modno, new.modno + 1);
    // Same content modulo the bumped modno and assigned guid
    assert_eq!(accepted.plans, new.plans);
    assert_eq!(accepted.repos[0].uri, new.repos[0].uri);
    assert!(!accepted.repos[0].guid.is_empty());

    // Persisted form matches what subscribers saw
    let reloaded = ConfigManager::load_or_init(&dir.path().join("config.json")).unwrap();
    assert_eq!(*reloaded.current(), *accepted);
}

#[test]
fn stale_modno_is_rejected() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir);
    manager.add_repo(repo("r1", "/srv/a")).unwrap();

    // A writer that read before the add loses the race
    let mut stale = (*manager.current()).clone();
    stale.modno -= 1;
    assert!(matches!(
        manager.set(stale),
        Err(ConfigError::StaleModno { .. })
    ));
}

#[test]
fn invalid_config_is_rejected_synchronously() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir);
    let mut new = (*manager.current()).clone();
    new.repos.push(repo("r1", ""));
    assert!(matches!(manager.set(new), Err(ConfigError::Invalid(_))));
    // Nothing changed
    assert!(manager.current().repos.is_empty());
}

#[test]
fn guid_is_stable_across_renames_but_not_uri_changes() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir);
    manager.add_repo(repo("r1", "/srv/a")).unwrap();
    let original_guid = manager.current().repos[0].guid.clone();

    // Editing unrelated fields keeps the guid
    let mut edit = (*manager.current()).clone();
    edit.repos[0].password = "changed".into();
    edit.repos[0].guid = Default::default();
    let accepted = manager.set(edit).unwrap();
    assert_eq!(accepted.repos[0].guid, original_guid);

    // Changing the uri points at different storage: fresh guid
    let mut moved = (*accepted).clone();
    moved.repos[0].uri = "/srv/b".into();
    let accepted = manager.set(moved).unwrap();
    assert_ne!(accepted.repos[0].guid, original_guid);
}

#[test]
fn subscribers_see_accepted_configs() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir);
    let mut rx = manager.subscribe();
    assert!(!rx.has_changed().unwrap());

    manager.add_repo(repo("r1", "/srv/a")).unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().repos.len(), 1);
}

#[test]
fn remove_repo_cascades_operation_deletion() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir);
    manager.add_repo(repo("r1", "/srv/a")).unwrap();
    let guid = manager.current().repos[0].guid.clone();

    let oplog = OpLog::open(&dir.path().join("oplog")).unwrap();
    let mut op = backrest_core::test_support::backup_op("inst", guid.as_str(), "p1");
    op.status = backrest_core::OpStatus::Success;
    oplog.add(op).unwrap();
    let mut other = backrest_core::test_support::backup_op("inst", "other-guid", "p1");
    other.status = backrest_core::OpStatus::Success;
    oplog.add(other).unwrap();

    let accepted = manager.remove_repo("r1", &oplog).unwrap();
    assert!(accepted.repos.is_empty());
    // Only the removed repo's operations are gone
    assert_eq!(oplog.len(), 1);
}

#[test]
fn remove_of_unknown_repo_errors() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir);
    let oplog = OpLog::open(&dir.path().join("oplog")).unwrap();
    assert!(matches!(
        manager.remove_repo("nope", &oplog),
        Err(ConfigError::RepoNotFound(_))
    ));
}
