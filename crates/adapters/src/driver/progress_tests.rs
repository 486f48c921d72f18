// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn status_line_parses_to_progress() {
    let line = r#"{"message_type":"status","percent_done":0.25,"total_files":10,"files_done":3,"total_bytes":4096,"bytes_done":1024,"current_files":["/data/a.txt"]}"#;
    match parse_backup_line(line).unwrap() {
        BackupEvent::Status(p) => {
            assert_eq!(p.percent_done, 0.25);
            assert_eq!(p.files_done, 3);
            assert_eq!(p.bytes_done, 1024);
            assert_eq!(p.total_bytes, 4096);
            assert_eq!(p.current_files, vec!["/data/a.txt"]);
        }
        other => panic!("expected status, got {other:?}"),
    }
}

#[test]
fn summary_line_parses_to_summary() {
    let line = r#"{"message_type":"summary","files_new":5,"files_changed":1,"files_unmodified":10,"dirs_new":0,"dirs_changed":2,"dirs_unmodified":3,"data_blobs":4,"tree_blobs":2,"data_added":2048,"total_files_processed":16,"total_bytes_processed":8192,"total_duration":1.5,"snapshot_id":"abcd1234"}"#;
    match parse_backup_line(line).unwrap() {
        BackupEvent::Summary(s) => {
            assert_eq!(s.files_new, 5);
            assert_eq!(s.data_added, 2048);
            assert_eq!(s.snapshot_id, "abcd1234");
        }
        other => panic!("expected summary, got {other:?}"),
    }
}

#[test]
fn non_json_and_unknown_messages_are_skipped() {
    assert!(parse_backup_line("plain text warning").is_none());
    assert!(parse_backup_line(r#"{"message_type":"verbose_status","item":"x"}"#).is_none());
    assert!(parse_backup_line("").is_none());
}

#[test]
fn restore_status_parses() {
    let line = r#"{"message_type":"status","percent_done":0.5,"total_bytes":100,"bytes_restored":50}"#;
    let p = parse_restore_line(line).unwrap();
    assert_eq!(p.percent_done, 0.5);
    assert_eq!(p.bytes_restored, 50);
}

#[test]
fn raw_snapshot_time_converts_to_epoch_ms() {
    let raw: RawSnapshot = serde_json::from_str(
        r#"{"id":"abc","time":"2024-01-01T00:00:30Z","tags":["plan:p1"],"paths":["/data"]}"#,
    )
    .unwrap();
    let meta = raw.into_meta();
    assert_eq!(meta.unix_time_ms, 1_704_067_230_000);
    assert_eq!(meta.tags, vec!["plan:p1"]);
}
