//! Daemon help output specs

use assert_cmd::Command;

#[test]
fn help_shows_usage_and_environment() {
    Command::cargo_bin("backrestd")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("USAGE:"))
        .stdout(predicates::str::contains("BACKREST_DATA"))
        .stdout(predicates::str::contains("BACKREST_RESTIC_COMMAND"));
}

#[test]
fn version_prints_the_package_version() {
    Command::cargo_bin("backrestd")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unexpected_arguments_are_rejected() {
    Command::cargo_bin("backrestd")
        .unwrap()
        .arg("--bogus")
        .assert()
        .failure()
        .stderr(predicates::str::contains("unexpected argument"));
}
