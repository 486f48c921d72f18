// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Argument and environment construction for backup-tool invocations.
//!
//! The child environment is scrubbed: only [`ENV_ALLOWLIST`] survives from
//! the parent, plus the repo's own configured variables and the
//! credentials the tool needs. The password travels via environment, never
//! argv, so it cannot leak through a process listing.

use backrest_config::Repo;

/// Parent environment variables the child is allowed to inherit.
pub const ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "HOME",
    "TMPDIR",
    "USER",
    "LANG",
    "XDG_CACHE_HOME",
];

/// Build the argv tail for a subcommand: repo-level flags first, then
/// operation flags, then positional arguments.
pub fn build_argv(repo: &Repo, subcommand: &str, flags: &[String], args: &[String]) -> Vec<String> {
    let mut argv = Vec::with_capacity(1 + repo.flags.len() + flags.len() + args.len());
    argv.push(subcommand.to_string());
    argv.extend(repo.flags.iter().cloned());
    argv.extend(flags.iter().cloned());
    argv.extend(args.iter().cloned());
    argv
}

/// Build the scrubbed child environment.
pub fn build_env(repo: &Repo) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = ENV_ALLOWLIST
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
        .collect();
    env.push(("RESTIC_REPOSITORY".to_string(), repo.uri.clone()));
    env.push(("RESTIC_PASSWORD".to_string(), repo.password.clone()));
    for (key, value) in &repo.env {
        env.push((key.clone(), value.clone()));
    }
    env
}

#[cfg(test)]
#[path = "argv_tests.rs"]
mod tests;
