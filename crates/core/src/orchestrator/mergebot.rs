//! The per-project MergeBot actor.
//!
//! A MergeBot remembers the latest commit pushed to every ephemeral stage of
//! its project. When one of its long-lived checkouts is pushed, it lists the
//! commits the checkout gained since the last scan; every stage whose latest
//! commit is among them has been merged and is retired through Projects.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::projects::ProjectsHandle;
use crate::build::Build;
use crate::errors::OrchestratorError;
use crate::git::VersionControl;
use crate::models::Notification;

/// Latest known commit of a stage.
pub struct BuildVersion {
    pub sha1: String,
    pub build: Build,
}

/// An integration branch checked out on disk and scanned for merges.
pub struct Checkout {
    pub stage: String,
    pub dir: PathBuf,
    pub ver: BuildVersion,
}

/// A push forwarded by Projects, carrying the stage's canonical build.
pub struct MergeRequest {
    pub notif: Arc<Notification>,
    pub build: Build,
}

impl MergeRequest {
    pub fn new(notif: Arc<Notification>, build: Build) -> Self {
        Self { notif, build }
    }
}

/// Sending side of a MergeBot queue.
#[derive(Clone)]
pub struct MergeBotHandle {
    project: Arc<str>,
    tx: mpsc::Sender<MergeRequest>,
}

impl MergeBotHandle {
    pub fn project(&self) -> &str {
        &self.project
    }

    pub async fn send(&self, req: MergeRequest) -> Result<(), OrchestratorError> {
        self.tx
            .send(req)
            .await
            .map_err(|_| OrchestratorError::ActorStopped("mergebot"))
    }
}

/// MergeBot state, owned by its task once [`MergeBot::run`] is spawned.
pub struct MergeBot {
    project: String,
    checkouts: HashMap<String, Checkout>,
    vers: HashMap<String, BuildVersion>,
    vcs: Arc<dyn VersionControl>,
    projects: ProjectsHandle,
    reqs: mpsc::Receiver<MergeRequest>,
}

impl MergeBot {
    pub fn new(
        project: impl Into<String>,
        vcs: Arc<dyn VersionControl>,
        projects: ProjectsHandle,
    ) -> (Self, MergeBotHandle) {
        let project = project.into();
        let (tx, reqs) = mpsc::channel(1);
        let handle = MergeBotHandle {
            project: Arc::from(project.as_str()),
            tx,
        };
        let bot = Self {
            project,
            checkouts: HashMap::new(),
            vers: HashMap::new(),
            vcs,
            projects,
            reqs,
        };
        (bot, handle)
    }

    /// Track `build`'s stage as a checkout in `dir`, last seen at `notif`.
    pub fn add_checkout(&mut self, dir: PathBuf, notif: &Notification, build: Build) {
        info!(
            project = %self.project,
            branch = %notif.branch,
            sha1 = %notif.sha1,
            stage = %build.stage(),
            "init checkout"
        );
        let stage = build.stage().to_string();
        let checkout = Checkout {
            stage: stage.clone(),
            dir,
            ver: BuildVersion {
                sha1: notif.sha1.clone(),
                build,
            },
        };
        self.checkouts.insert(stage, checkout);
    }

    pub async fn run(mut self) {
        info!(project = %self.project, checkouts = self.checkouts.len(), "mergebot started");
        while let Some(req) = self.reqs.recv().await {
            if self.checkouts.contains_key(req.build.stage()) {
                self.check_merged(req).await;
            } else {
                self.register_build(req);
            }
        }
        info!(project = %self.project, "mergebot stopped");
    }

    fn register_build(&mut self, req: MergeRequest) {
        info!(
            project = %self.project,
            sha1 = %req.notif.sha1,
            stage = %req.build.stage(),
            "set latest revision"
        );
        self.vers.insert(
            req.build.stage().to_string(),
            BuildVersion {
                sha1: req.notif.sha1.clone(),
                build: req.build,
            },
        );
    }

    async fn check_merged(&mut self, req: MergeRequest) {
        let Some(checkout) = self.checkouts.get_mut(req.build.stage()) else {
            return;
        };
        if checkout.ver.sha1.is_empty() {
            warn!(
                project = %self.project,
                checkout = %checkout.stage,
                "cannot fetch commits since last build, last SHA1 is empty"
            );
            return;
        }
        info!(
            project = %self.project,
            checkout = %checkout.stage,
            since = %checkout.ver.sha1,
            "checking for merged stages"
        );

        let commits = match self.vcs.commits_since(&checkout.ver.sha1, &checkout.dir).await {
            Ok(commits) => commits,
            Err(e) => {
                warn!(
                    project = %self.project,
                    dir = %checkout.dir.display(),
                    since = %checkout.ver.sha1,
                    error = %e,
                    "cannot fetch commits"
                );
                return;
            }
        };
        debug!(count = commits.len(), "new commits on checkout");

        let merged: Vec<String> = self
            .vers
            .iter()
            .filter(|(_, ver)| commits.contains(&ver.sha1))
            .map(|(stage, _)| stage.clone())
            .collect();
        for stage in merged {
            if let Some(ver) = self.vers.remove(&stage) {
                info!(project = %self.project, stage = %stage, sha1 = %ver.sha1, "stage was merged, removing");
                submit_merge(self.projects.clone(), ver.build, req.notif.clone());
            }
        }

        info!(
            project = %self.project,
            checkout = %checkout.stage,
            sha1 = %req.notif.sha1,
            "merge check done, set latest revision"
        );
        checkout.ver = BuildVersion {
            sha1: req.notif.sha1.clone(),
            build: req.build,
        };
    }
}

/// Hand a merge decision to Projects on its own task.
///
/// Projects may be blocked sending a request to this bot while the bot is
/// processing; the bot therefore never waits on the Projects queue itself.
fn submit_merge(projects: ProjectsHandle, build: Build, notif: Arc<Notification>) {
    tokio::spawn(async move {
        let stage = build.stage().to_string();
        if let Err(e) = projects.merge(build, notif).await {
            warn!(stage = %stage, error = %e, "cannot submit merge");
        }
    });
}
