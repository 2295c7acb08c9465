//! Test doubles for the orchestrator actors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::build::{Build, BuildExecutor, BuildFactory};
use crate::errors::{BuildError, GitError};
use crate::git::{CommitSet, VersionControl};
use crate::models::{BuildAct, Notification};

#[derive(Default)]
struct Entries {
    acts: Vec<(String, BuildAct, String)>,
    runs: HashMap<String, usize>,
    destroys: HashMap<String, usize>,
}

/// Everything recording builds were asked to do, across all stages.
#[derive(Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Entries>>,
}

impl Journal {
    fn with<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> T {
        f(&mut self.entries.lock().unwrap())
    }

    pub fn acts(&self, stage: &str) -> Vec<(BuildAct, String)> {
        self.with(|e| {
            e.acts
                .iter()
                .filter(|(s, _, _)| s == stage)
                .map(|(_, act, sha1)| (*act, sha1.clone()))
                .collect()
        })
    }

    pub fn runs(&self, stage: &str) -> usize {
        self.with(|e| e.runs.get(stage).copied().unwrap_or(0))
    }

    pub fn destroys(&self, stage: &str) -> usize {
        self.with(|e| e.destroys.get(stage).copied().unwrap_or(0))
    }
}

/// A build that only records what it is asked to do.
pub struct RecordingBuild {
    stage: String,
    journal: Journal,
    running: AtomicBool,
    destroyed: AtomicBool,
}

impl RecordingBuild {
    pub fn new(stage: &str, journal: &Journal) -> Build {
        Arc::new(Self {
            stage: stage.to_string(),
            journal: journal.clone(),
            running: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl BuildExecutor for RecordingBuild {
    fn stage(&self) -> &str {
        &self.stage
    }

    fn branch(&self) -> &str {
        &self.stage
    }

    fn run(&self) -> Result<(), BuildError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BuildError::AlreadyRunning(self.stage.clone()));
        }
        self.journal
            .with(|e| *e.runs.entry(self.stage.clone()).or_default() += 1);
        Ok(())
    }

    async fn request(&self, act: BuildAct, notif: Arc<Notification>) -> Result<(), BuildError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(BuildError::Stopped(self.stage.clone()));
        }
        self.journal
            .with(|e| e.acts.push((self.stage.clone(), act, notif.sha1.clone())));
        Ok(())
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.journal
            .with(|e| *e.destroys.entry(self.stage.clone()).or_default() += 1);
    }
}

/// Canned history: commit ranges by reference, heads by directory.
#[derive(Default)]
pub struct FakeVcs {
    since: HashMap<String, Vec<String>>,
    heads: HashMap<PathBuf, String>,
    calls: AtomicUsize,
}

impl FakeVcs {
    pub fn with_since(mut self, reference: &str, commits: &[&str]) -> Self {
        self.since.insert(
            reference.to_string(),
            commits.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn with_head(mut self, dir: &str, sha1: &str) -> Self {
        self.heads.insert(PathBuf::from(dir), sha1.to_string());
        self
    }

    /// Number of `commits_since` queries made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn commits_since(&self, reference: &str, _dir: &Path) -> Result<CommitSet, GitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.since
            .get(reference)
            .map(|commits| CommitSet::new(commits.clone()))
            .ok_or_else(|| GitError::CommitNotFound(reference.to_string()))
    }

    async fn last_commits(&self, n: usize, dir: &Path) -> Result<CommitSet, GitError> {
        self.heads
            .get(dir)
            .map(|head| CommitSet::new(vec![head.clone()].into_iter().take(n).collect()))
            .ok_or_else(|| GitError::RepositoryNotFound(dir.display().to_string()))
    }
}

/// One recording build per branch, named after the branch; `skip` yields none.
pub struct RecordingFactory {
    journal: Journal,
    skip: Vec<String>,
}

impl RecordingFactory {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            skip: Vec::new(),
        }
    }

    pub fn skipping(mut self, branch: &str) -> Self {
        self.skip.push(branch.to_string());
        self
    }
}

impl BuildFactory for RecordingFactory {
    fn builds(&self, notif: &Arc<Notification>) -> Result<Vec<Build>, BuildError> {
        if self.skip.contains(&notif.branch) {
            return Ok(Vec::new());
        }
        Ok(vec![RecordingBuild::new(&notif.branch, &self.journal)])
    }
}

/// Poll `cond` for up to a second.
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
