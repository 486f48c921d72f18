// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn interpolates_known_keys() {
    let v = vars(&[("event", "snapshot_success"), ("repo_id", "local")]);
    assert_eq!(
        interpolate("${event} on ${repo_id}", &v),
        "snapshot_success on local"
    );
}

#[test]
fn unknown_keys_are_left_intact() {
    let v = vars(&[]);
    assert_eq!(interpolate("${nope}", &v), "${nope}");
}

#[test]
fn shell_interpolation_escapes_metacharacters() {
    let v = vars(&[("error", "rm -rf \"$HOME\" `boom`")]);
    assert_eq!(
        interpolate_shell("echo \"${error}\"", &v),
        "echo \"rm -rf \\\"\\$HOME\\\" \\`boom\\`\""
    );
}

#[test]
fn json_modifier_produces_a_string_literal() {
    let v = vars(&[("summary", "files: 3\nbytes: 9")]);
    assert_eq!(
        interpolate("{\"text\": ${summary:json}}", &v),
        "{\"text\": \"files: 3\\nbytes: 9\"}"
    );
}

#[test]
fn environment_is_not_expanded() {
    // A ${PATH}-style reference resolves only through the vars map
    let v = vars(&[]);
    assert_eq!(interpolate("${PATH}", &v), "${PATH}");
}

#[test]
fn vocabulary_check_flags_unknown_keys() {
    assert!(check_vocabulary("${event} ${status}", HOOK_VOCABULARY).is_ok());
    let err = check_vocabulary("${event} ${oops}", HOOK_VOCABULARY).unwrap_err();
    assert!(err.contains("oops"));
}

#[parameterized(
    bytes = { 512, "512 B" },
    kib = { 2048, "2.0 KiB" },
    gib = { 3 * 1024 * 1024 * 1024, "3.0 GiB" },
)]
fn size_formatting(bytes: u64, expect: &str) {
    assert_eq!(format_size_bytes(bytes), expect);
}

#[parameterized(
    seconds = { 42_000, "42s" },
    minutes = { 125_000, "2m 5s" },
    hours = { 3_780_000, "1h 3m" },
)]
fn duration_formatting(ms: i64, expect: &str) {
    assert_eq!(format_duration(ms), expect);
}

#[test]
fn time_formatting_is_utc() {
    assert_eq!(format_time(0), "1970-01-01 00:00:00");
}
