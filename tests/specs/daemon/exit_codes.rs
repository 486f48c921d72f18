//! Daemon startup exit-code specs
//!
//! Exit codes: 1 configuration invalid, 2 backup binary missing,
//! 3 data directory unwritable.

use assert_cmd::Command;
use tempfile::TempDir;

fn daemon(data: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("backrestd").unwrap();
    cmd.env_clear()
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .env("BACKREST_DATA", data.path())
        .env(
            "BACKREST_CONFIG",
            data.path().join("config.json"),
        );
    cmd
}

#[test]
fn invalid_config_exits_with_1() {
    let data = TempDir::new().unwrap();
    std::fs::write(data.path().join("config.json"), "{not json").unwrap();

    daemon(&data)
        .assert()
        .failure()
        .code(1)
        .stderr(predicates::str::contains("invalid configuration"));
}

#[test]
fn config_failing_validation_exits_with_1() {
    let data = TempDir::new().unwrap();
    std::fs::write(
        data.path().join("config.json"),
        r#"{"modno":1,"instance":"i","repos":[{"id":"r1","guid":"g","uri":"/srv","password":""}]}"#,
    )
    .unwrap();

    daemon(&data).assert().failure().code(1);
}

#[test]
fn missing_backup_binary_exits_with_2() {
    let data = TempDir::new().unwrap();
    daemon(&data)
        .assert()
        .failure()
        .code(2)
        .stderr(predicates::str::contains("not found"));
}

#[test]
fn override_pointing_nowhere_exits_with_2() {
    let data = TempDir::new().unwrap();
    daemon(&data)
        .env("BACKREST_RESTIC_COMMAND", "/nonexistent/restic")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn unwritable_data_directory_exits_with_3() {
    let data = TempDir::new().unwrap();
    daemon(&data)
        .env("BACKREST_DATA", "/dev/null/not-a-directory")
        .assert()
        .failure()
        .code(3)
        .stderr(predicates::str::contains("unwritable"));
}
