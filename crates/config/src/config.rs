// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Root configuration document

use crate::{Plan, Repo};
use backrest_core::{InstanceId, PlanId, RepoId};
use serde::{Deserialize, Serialize};

/// The declarative configuration for one orchestrator instance.
///
/// `modno` is a revision counter: every accepted `set` bumps it, and a
/// writer must present the modno it read for the write to be accepted
/// (compare-and-swap against concurrent editors).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub modno: i64,
    /// Identity of this instance; stamped onto every operation it creates.
    #[serde(default)]
    pub instance: InstanceId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<Repo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plans: Vec<Plan>,
}

impl Config {
    pub fn get_repo(&self, id: &RepoId) -> Option<&Repo> {
        self.repos.iter().find(|r| r.id == *id)
    }

    pub fn get_plan(&self, id: &PlanId) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == *id)
    }

    /// Repo a plan writes to, if both sides of the reference exist.
    pub fn repo_for_plan(&self, id: &PlanId) -> Option<&Repo> {
        self.get_plan(id).and_then(|p| self.get_repo(&p.repo))
    }

    /// Plans targeting the given repo.
    pub fn plans_for_repo<'a>(&'a self, id: &'a RepoId) -> impl Iterator<Item = &'a Plan> + 'a {
        self.plans.iter().filter(move |p| p.repo == *id)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
