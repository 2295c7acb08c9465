//! Domain model types used throughout stagekeeper.
//!
//! These types bridge the orchestrator, the build executors, the result
//! store and the web API.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Canonical record of one observed push.
///
/// Notifications are immutable once created and are shared between actors
/// behind an [`Arc`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub project: String,
    pub sha1: String,
    pub branch: String,
}

impl Notification {
    pub fn new(
        project: impl Into<String>,
        sha1: impl Into<String>,
        branch: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            project: project.into(),
            sha1: sha1.into(),
            branch: branch.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Build actions
// ---------------------------------------------------------------------------

/// Lifecycle action applied to a stage build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildAct {
    Create,
    Update,
    Change,
    Destroy,
}

impl BuildAct {
    pub const ALL: [BuildAct; 4] = [Self::Create, Self::Update, Self::Change, Self::Destroy];

    /// Parse an action name as stored in the database.
    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "change" => Some(Self::Change),
            "destroy" => Some(Self::Destroy),
            _ => None,
        }
    }
}

impl std::fmt::Display for BuildAct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Change => write!(f, "change"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

// ---------------------------------------------------------------------------
// Build result
// ---------------------------------------------------------------------------

/// Outcome of one action run against a stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildResult {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub act: BuildAct,
    pub stdout: String,
    pub stderr: String,
    pub retval: i32,
    pub cmd: String,
    pub stage: String,
    pub branch: String,
    pub sha1: String,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        self.retval == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_act_names() {
        for act in BuildAct::ALL {
            assert_eq!(BuildAct::from_str_val(&act.to_string()), Some(act));
        }
        assert_eq!(BuildAct::from_str_val("rebuild"), None);
    }

    #[test]
    fn test_build_result_success() {
        let now = Utc::now();
        let mut result = BuildResult {
            start: now,
            end: now,
            act: BuildAct::Create,
            stdout: String::new(),
            stderr: String::new(),
            retval: 0,
            cmd: "deploy create".into(),
            stage: "feature-x".into(),
            branch: "feature-x".into(),
            sha1: "a1".into(),
        };
        assert!(result.succeeded());
        result.retval = 2;
        assert!(!result.succeeded());
    }
}
