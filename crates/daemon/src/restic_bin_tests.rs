// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;
use tempfile::TempDir;

fn env_for(dir: &TempDir) -> Env {
    Env {
        data_dir: dir.path().to_owned(),
        config_path: dir.path().join("config.json"),
        port: 9898,
    }
}

#[test]
#[serial]
fn environment_override_wins_when_absolute_and_present() {
    let dir = TempDir::new().unwrap();
    let fake = dir.path().join("restic");
    std::fs::write(&fake, b"#!/bin/sh\n").unwrap();

    std::env::set_var(ENV_RESTIC_COMMAND, fake.display().to_string());
    let resolved = resolve_binary(&env_for(&dir)).unwrap();
    assert_eq!(resolved, fake);
    std::env::remove_var(ENV_RESTIC_COMMAND);
}

#[test]
#[serial]
fn relative_override_is_rejected() {
    std::env::set_var(ENV_RESTIC_COMMAND, "restic");
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        resolve_binary(&env_for(&dir)),
        Err(BinaryError::NotAbsolute(_))
    ));
    std::env::remove_var(ENV_RESTIC_COMMAND);
}

#[test]
#[serial]
fn missing_pinned_binary_is_reported() {
    std::env::remove_var(ENV_RESTIC_COMMAND);
    let dir = TempDir::new().unwrap();
    let err = resolve_binary(&env_for(&dir)).unwrap_err();
    match err {
        BinaryError::Missing(path) => {
            assert!(path.ends_with(format!("restic-{RESTIC_VERSION}")));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
#[serial]
fn pinned_binary_with_matching_sidecar_resolves() {
    std::env::remove_var(ENV_RESTIC_COMMAND);
    let dir = TempDir::new().unwrap();
    let env = env_for(&dir);
    std::fs::create_dir_all(env.restic_dir()).unwrap();
    let pinned = env.restic_dir().join(format!("restic-{RESTIC_VERSION}"));
    std::fs::write(&pinned, b"binary bytes").unwrap();

    let digest = format!("{:x}", sha2::Sha256::digest(b"binary bytes"));
    std::fs::write(pinned.with_extension("sha256"), format!("{digest}  restic\n")).unwrap();

    assert_eq!(resolve_binary(&env).unwrap(), pinned);
}

#[test]
#[serial]
fn tampered_binary_is_refused() {
    std::env::remove_var(ENV_RESTIC_COMMAND);
    let dir = TempDir::new().unwrap();
    let env = env_for(&dir);
    std::fs::create_dir_all(env.restic_dir()).unwrap();
    let pinned = env.restic_dir().join(format!("restic-{RESTIC_VERSION}"));
    std::fs::write(&pinned, b"tampered").unwrap();
    std::fs::write(
        pinned.with_extension("sha256"),
        format!("{:x}  restic\n", sha2::Sha256::digest(b"original")),
    )
    .unwrap();

    assert!(matches!(
        resolve_binary(&env),
        Err(BinaryError::ChecksumMismatch { .. })
    ));
}

#[test]
fn verify_sha256_accepts_uppercase_digests() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blob");
    std::fs::write(&path, b"data").unwrap();
    let digest = format!("{:X}", sha2::Sha256::digest(b"data"));
    assert!(verify_sha256(&path, &digest).is_ok());
}
