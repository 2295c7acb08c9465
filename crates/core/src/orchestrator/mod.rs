//! Stage lifecycle orchestration.
//!
//! Two kinds of actors cooperate here. [`Projects`] owns the live stages and
//! applies every push and merge in arrival order. One [`MergeBot`] per
//! project tracks the latest commit of each stage and, when a checkout
//! advances, asks Projects to retire the stages it absorbed.
//!
//! Projects sends to MergeBots and waits for them to accept; MergeBots only
//! ever reach Projects from spawned tasks. Keeping that direction
//! asynchronous is what makes the pair deadlock-free.
//!
//! [`Orchestrator`] wires the actors up from the configuration and is the
//! entry point for push notifications.

pub mod mergebot;
pub mod projects;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::build::BuildFactory;
use crate::config::{AppConfig, ProjectConfig};
use crate::errors::OrchestratorError;
use crate::git::VersionControl;
use crate::models::Notification;

pub use mergebot::{BuildVersion, Checkout, MergeBot, MergeBotHandle, MergeRequest};
pub use projects::{Projects, ProjectsHandle, ProjectsRequest};

/// Running actors plus the push entry point.
pub struct Orchestrator {
    projects: ProjectsHandle,
    bots: HashMap<String, MergeBotHandle>,
    factory: Arc<dyn BuildFactory>,
    tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Provision static stages and checkouts for every configured project
    /// and spawn the actors.
    ///
    /// Problems with a single checkout or static branch are logged and that
    /// branch is skipped.
    pub async fn start(
        config: &AppConfig,
        factory: Arc<dyn BuildFactory>,
        vcs: Arc<dyn VersionControl>,
    ) -> Self {
        let (mut projects, handle) = Projects::new();
        let mut bots = HashMap::new();
        let mut tasks = Vec::with_capacity(config.envs.len() + 1);

        for (name, project) in &config.envs {
            let (mut bot, bot_handle) = MergeBot::new(name.clone(), vcs.clone(), handle.clone());
            let mut checkouts = detect_checkouts(name, project, vcs.as_ref()).await;

            for branch in &project.statics {
                let (notif, dir) = match checkouts.remove(branch) {
                    Some((notif, dir)) => (notif, Some(dir)),
                    None => (Notification::new(name.clone(), "", branch.clone()), None),
                };
                let builds = match factory.builds(&notif) {
                    Ok(builds) => builds,
                    Err(e) => {
                        warn!(project = %name, branch = %branch, error = %e, "cannot add existing build");
                        continue;
                    }
                };
                let Some(first) = builds.first().cloned() else {
                    warn!(project = %name, branch = %branch, "no static builds to manage");
                    continue;
                };
                for build in builds {
                    projects.add_static(build);
                }
                if let Some(dir) = dir {
                    bot.add_checkout(dir, &notif, first);
                }
            }
            for branch in checkouts.keys() {
                warn!(
                    project = %name,
                    branch = %branch,
                    "merge branch is not a static branch, not tracked"
                );
            }

            tasks.push(tokio::spawn(bot.run()));
            bots.insert(name.clone(), bot_handle);
        }

        tasks.push(tokio::spawn(projects.run()));
        info!(projects = bots.len(), "orchestrator started");
        Self {
            projects: handle,
            bots,
            factory,
            tasks,
        }
    }

    /// Schedule a push. Returns once Projects has accepted every stage the
    /// push maps to, with the number of stages.
    pub async fn notify(&self, notif: Arc<Notification>) -> Result<usize, OrchestratorError> {
        let bot = self
            .bots
            .get(&notif.project)
            .ok_or_else(|| OrchestratorError::UnknownProject(notif.project.clone()))?;
        let builds = self.factory.builds(&notif)?;
        if builds.is_empty() {
            debug!(project = %notif.project, branch = %notif.branch, "push maps to no stage");
        }
        let count = builds.len();
        for build in builds {
            self.projects.push(build, notif.clone(), bot.clone()).await?;
        }
        Ok(count)
    }

    /// Live stage ids, sorted.
    pub async fn stages(&self) -> Result<Vec<String>, OrchestratorError> {
        self.projects.stages().await
    }

    /// Configured project names.
    pub fn projects(&self) -> impl Iterator<Item = &str> {
        self.bots.keys().map(String::as_str)
    }

    /// Close every queue and wait for the actors to drain them.
    pub async fn shutdown(self) {
        let Self {
            projects,
            bots,
            tasks,
            ..
        } = self;
        drop(bots);
        drop(projects);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "actor task failed");
            }
        }
        info!("orchestrator stopped");
    }
}

/// Last commit of each merge-tracked checkout, keyed by branch.
async fn detect_checkouts(
    project: &str,
    config: &ProjectConfig,
    vcs: &dyn VersionControl,
) -> BTreeMap<String, (Arc<Notification>, PathBuf)> {
    let mut checkouts = BTreeMap::new();
    for (branch, dir) in &config.merges {
        info!(project, branch = %branch, dir = %dir.display(), "getting last commit");
        let head = match vcs.last_commits(1, dir).await {
            Ok(commits) => commits.first().map(str::to_string),
            Err(e) => {
                warn!(project, branch = %branch, error = %e, "error initializing checked-out project");
                continue;
            }
        };
        let Some(sha1) = head else {
            warn!(project, branch = %branch, "checkout has no commits");
            continue;
        };
        checkouts.insert(
            branch.clone(),
            (Notification::new(project, sha1, branch.clone()), dir.clone()),
        );
    }
    checkouts
}
