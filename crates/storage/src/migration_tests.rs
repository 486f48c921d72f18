// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

struct AddField;

impl Migration for AddField {
    fn source_version(&self) -> u32 {
        1
    }
    fn target_version(&self) -> u32 {
        2
    }
    fn migrate(&self, snapshot: &mut Value) -> Result<(), MigrationError> {
        if let Some(obj) = snapshot.as_object_mut() {
            obj.insert("extra".into(), json!(true));
        }
        Ok(())
    }
}

fn registry_with(migrations: Vec<Box<dyn Migration>>) -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    registry.migrations = migrations;
    registry
}

#[test]
fn current_version_is_a_no_op() {
    let registry = MigrationRegistry::new();
    let snapshot = json!({"v": 1, "seq": 5});
    let migrated = registry.migrate_to(snapshot.clone(), 1).unwrap();
    assert_eq!(migrated, snapshot);
}

#[test]
fn missing_version_defaults_to_one() {
    let registry = MigrationRegistry::new();
    assert!(registry.migrate_to(json!({"seq": 5}), 1).is_ok());
}

#[test]
fn newer_snapshot_is_rejected() {
    let registry = MigrationRegistry::new();
    let err = registry.migrate_to(json!({"v": 9}), 1).unwrap_err();
    assert!(matches!(err, MigrationError::TooNew(9, 1)));
}

#[test]
fn chained_migration_bumps_version() {
    let registry = registry_with(vec![Box::new(AddField)]);
    let migrated = registry.migrate_to(json!({"v": 1}), 2).unwrap();
    assert_eq!(migrated["v"], 2);
    assert_eq!(migrated["extra"], true);
}

#[test]
fn missing_migration_path_errors() {
    let registry = MigrationRegistry::new();
    let err = registry.migrate_to(json!({"v": 1}), 2).unwrap_err();
    assert!(matches!(err, MigrationError::NoPath(1, 2)));
}
