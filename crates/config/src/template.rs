// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hook template interpolation
//!
//! Hook scripts and notifier bodies may reference a closed vocabulary of
//! `${key}` placeholders (event, repo_id, plan_id, snapshot_id, status,
//! error, summary, duration, ...). Values come exclusively from the map the
//! runner builds; the engine never reads the process environment, so a
//! template cannot exfiltrate anything the vocabulary does not name.
//!
//! Modifiers: `${key:shell}` escapes the value for double-quoted shell
//! contexts, `${key:json}` substitutes the value as a JSON string literal.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Regex pattern for ${key} or ${key:modifier}
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::(shell|json))?\}")
        .expect("constant regex pattern is valid")
});

/// Escape a string for safe use inside shell double-quoted contexts.
///
/// Characters that have special meaning in double-quoted shell strings
/// are backslash-escaped so they're treated literally:
/// - Backslash `\` → `\\`
/// - Dollar sign `$` → `\$`
/// - Backtick `` ` `` → `` \` ``
/// - Double quote `"` → `\"`
pub fn escape_for_shell(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '$' => result.push_str("\\$"),
            '`' => result.push_str("\\`"),
            '"' => result.push_str("\\\""),
            _ => result.push(c),
        }
    }
    result
}

/// Interpolate `${key}` placeholders with values from the vars map.
///
/// Unknown keys are left as-is so a typo is visible in the output rather
/// than silently blank.
pub fn interpolate(template: &str, vars: &HashMap<String, String>) -> String {
    VAR_PATTERN
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            let Some(value) = vars.get(key) else {
                return caps[0].to_string();
            };
            match caps.get(2).map(|m| m.as_str()) {
                Some("shell") => escape_for_shell(value),
                Some("json") => serde_json::Value::String(value.clone()).to_string(),
                _ => value.clone(),
            }
        })
        .to_string()
}

/// Interpolate for a shell script: every substitution is shell-escaped
/// unless the template explicitly asked for `:json`.
pub fn interpolate_shell(template: &str, vars: &HashMap<String, String>) -> String {
    VAR_PATTERN
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            let Some(value) = vars.get(key) else {
                return caps[0].to_string();
            };
            match caps.get(2).map(|m| m.as_str()) {
                Some("json") => serde_json::Value::String(value.clone()).to_string(),
                _ => escape_for_shell(value),
            }
        })
        .to_string()
}

/// Check that a template only references the allowlisted vocabulary.
pub fn check_vocabulary(template: &str, allowed: &[&str]) -> Result<(), String> {
    for caps in VAR_PATTERN.captures_iter(template) {
        let key = &caps[1];
        if !allowed.contains(&key) {
            return Err(format!("unknown template variable ${{{key}}}"));
        }
    }
    Ok(())
}

/// Keys the runner provides to every hook invocation.
pub const HOOK_VOCABULARY: &[&str] = &[
    "event",
    "repo_id",
    "plan_id",
    "snapshot_id",
    "status",
    "error",
    "summary",
    "duration",
    "start_time",
    "bytes_added",
    "files_processed",
];

/// Format epoch milliseconds as UTC `YYYY-MM-DD HH:MM:SS`.
pub fn format_time(epoch_ms: i64) -> String {
    match chrono::DateTime::<chrono::Utc>::from_timestamp_millis(epoch_ms) {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => epoch_ms.to_string(),
    }
}

/// Format a byte count with binary units ("1.5 GiB").
pub fn format_size_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Format a millisecond duration compactly ("2m 5s", "1h 3m").
pub fn format_duration(ms: i64) -> String {
    let secs = ms / 1000;
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
