//! Version-control queries against on-disk checkouts.

pub mod client;

use std::path::Path;

use async_trait::async_trait;

use crate::errors::GitError;

pub use client::GitClient;

/// Ordered commit ids, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSet {
    commits: Vec<String>,
}

impl CommitSet {
    pub fn new(commits: Vec<String>) -> Self {
        Self { commits }
    }

    /// Hex ids compare case-insensitively; an empty id is never contained.
    pub fn contains(&self, sha1: &str) -> bool {
        !sha1.is_empty() && self.commits.iter().any(|c| c.eq_ignore_ascii_case(sha1))
    }

    pub fn first(&self) -> Option<&str> {
        self.commits.first().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.commits.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for CommitSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// History queries used for merge detection and checkout initialization.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Commits reachable from the checkout's HEAD but not from `reference`.
    async fn commits_since(&self, reference: &str, dir: &Path) -> Result<CommitSet, GitError>;

    /// The `n` most recent commits on the checkout's HEAD.
    async fn last_commits(&self, n: usize, dir: &Path) -> Result<CommitSet, GitError>;
}
