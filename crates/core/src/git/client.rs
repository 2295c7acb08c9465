//! Local history queries via `git2`.
//!
//! `git2` is blocking, so every query runs on the blocking pool and is
//! bounded by the configured timeout. A stuck checkout therefore stalls only
//! the MergeBot request that asked, and only for that long.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use git2::{Oid, Repository, Sort};
use tracing::{debug, instrument};

use super::{CommitSet, VersionControl};
use crate::errors::GitError;

/// [`VersionControl`] implementation reading checkouts with `git2`.
#[derive(Debug, Clone)]
pub struct GitClient {
    timeout: Duration,
}

impl GitClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run_blocking<T, F>(&self, dir: &Path, query: F) -> Result<T, GitError>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Result<T, GitError> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking({
            let dir = dir.to_path_buf();
            move || query(dir)
        });
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(GitError::TaskFailed(e.to_string())),
            Err(_) => Err(GitError::Timeout {
                dir: dir.display().to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

fn open(dir: &Path) -> Result<Repository, GitError> {
    Repository::open(dir).map_err(|_| GitError::RepositoryNotFound(dir.display().to_string()))
}

fn head_walk<'r>(repo: &'r Repository, dir: &Path) -> Result<git2::Revwalk<'r>, GitError> {
    let mut revwalk = repo.revwalk()?;
    revwalk
        .push_head()
        .map_err(|_| GitError::EmptyHistory(dir.display().to_string()))?;
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
    Ok(revwalk)
}

fn commits_since_blocking(reference: &str, dir: &Path) -> Result<CommitSet, GitError> {
    let repo = open(dir)?;
    let oid = Oid::from_str(reference)
        .and_then(|oid| repo.find_commit(oid).map(|c| c.id()))
        .map_err(|_| GitError::CommitNotFound(reference.to_string()))?;

    let mut revwalk = head_walk(&repo, dir)?;
    revwalk.hide(oid)?;
    let commits = revwalk
        .map(|r| r.map(|oid| oid.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(count = commits.len(), "collected commits since reference");
    Ok(CommitSet::new(commits))
}

fn last_commits_blocking(n: usize, dir: &Path) -> Result<CommitSet, GitError> {
    let repo = open(dir)?;
    let commits = head_walk(&repo, dir)?
        .take(n)
        .map(|r| r.map(|oid| oid.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    if commits.is_empty() {
        return Err(GitError::EmptyHistory(dir.display().to_string()));
    }
    Ok(CommitSet::new(commits))
}

#[async_trait]
impl VersionControl for GitClient {
    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn commits_since(&self, reference: &str, dir: &Path) -> Result<CommitSet, GitError> {
        let reference = reference.to_string();
        self.run_blocking(dir, move |dir| commits_since_blocking(&reference, &dir))
            .await
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn last_commits(&self, n: usize, dir: &Path) -> Result<CommitSet, GitError> {
        self.run_blocking(dir, move |dir| last_commits_blocking(n, &dir))
            .await
    }
}
