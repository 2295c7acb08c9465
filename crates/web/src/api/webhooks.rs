//! Push-notification ingress.
//!
//! Speaks the Jenkins git plugin's `notifyCommit` dialect so existing
//! post-receive hooks can point at stagekeeper unchanged.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tracing::info;

use stagekeeper_core::Notification;

use crate::api::status::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NotifyCommitQuery {
    pub sha1: Option<String>,
    /// Comma-separated; only the first branch is used.
    pub branches: Option<String>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/:project/jenkins/git/notifyCommit",
        get(notify_commit).post(notify_commit),
    )
}

async fn notify_commit(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    Query(query): Query<NotifyCommitQuery>,
) -> Result<String, AppError> {
    let sha1 = query
        .sha1
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("missing sha1 parameter".into()))?;
    let sha1 = normalize_sha1(&sha1)
        .ok_or_else(|| AppError::BadRequest(format!("invalid sha1 '{}'", sha1.trim())))?;
    let branch = first_branch(query.branches.as_deref())
        .unwrap_or(state.config.web.default_branch.as_str())
        .to_string();

    info!(project = %project, branch = %branch, sha1 = %sha1, "notified commit");
    let stages = state
        .orchestrator
        .notify(Notification::new(project.clone(), sha1, branch))
        .await?;
    info!(project = %project, stages, "push scheduled");

    Ok(format!("Scheduled this {} job for ya!", project))
}

/// Full commit ids only, lowercased the way `git2` prints them.
fn normalize_sha1(sha1: &str) -> Option<String> {
    let sha1 = sha1.trim();
    if sha1.len() != 40 || !sha1.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(sha1.to_ascii_lowercase())
}

fn first_branch(branches: Option<&str>) -> Option<&str> {
    branches?
        .split(',')
        .map(str::trim)
        .find(|b| !b.is_empty())
}
