//! The Projects actor: sole owner of the live-stage map.
//!
//! Every create, change and destroy decision goes through one queue and is
//! applied by one task, so a stage can never be created twice and is
//! destroyed by exactly one path.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::mergebot::{MergeBotHandle, MergeRequest};
use crate::build::Build;
use crate::errors::OrchestratorError;
use crate::models::{BuildAct, Notification};

/// Work accepted by the Projects actor.
pub enum ProjectsRequest {
    /// A branch was pushed: create the stage or advance the existing one.
    Push {
        build: Build,
        notif: Arc<Notification>,
        bot: MergeBotHandle,
    },
    /// The stage's work landed in a checkout: retire it.
    Merge {
        build: Build,
        notif: Arc<Notification>,
    },
    /// Snapshot of the live stage ids.
    Stages { reply: oneshot::Sender<Vec<String>> },
}

/// Sending side of the Projects queue.
#[derive(Clone)]
pub struct ProjectsHandle {
    tx: mpsc::Sender<ProjectsRequest>,
}

impl ProjectsHandle {
    async fn send(&self, req: ProjectsRequest) -> Result<(), OrchestratorError> {
        self.tx
            .send(req)
            .await
            .map_err(|_| OrchestratorError::ActorStopped("projects"))
    }

    pub async fn push(
        &self,
        build: Build,
        notif: Arc<Notification>,
        bot: MergeBotHandle,
    ) -> Result<(), OrchestratorError> {
        self.send(ProjectsRequest::Push { build, notif, bot }).await
    }

    pub async fn merge(&self, build: Build, notif: Arc<Notification>) -> Result<(), OrchestratorError> {
        self.send(ProjectsRequest::Merge { build, notif }).await
    }

    /// A handle whose queue is read directly by the caller instead of an actor.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<ProjectsRequest>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Live stage ids, sorted.
    pub async fn stages(&self) -> Result<Vec<String>, OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.send(ProjectsRequest::Stages { reply }).await?;
        rx.await.map_err(|_| OrchestratorError::ActorStopped("projects"))
    }
}

/// The Projects actor state. Build it, register the static stages, then move
/// it into its own task with [`Projects::run`].
pub struct Projects {
    stages: HashMap<String, Build>,
    reqs: mpsc::Receiver<ProjectsRequest>,
}

impl Projects {
    pub fn new() -> (Self, ProjectsHandle) {
        // Capacity 1: a sender waits until the actor has taken the previous
        // request off the queue.
        let (tx, reqs) = mpsc::channel(1);
        let projects = Self {
            stages: HashMap::new(),
            reqs,
        };
        (projects, ProjectsHandle { tx })
    }

    /// Register a stage that already exists at startup and start its run
    /// loop. No action is requested. Returns false if the stage is already
    /// live.
    pub fn add_static(&mut self, build: Build) -> bool {
        if self.stages.contains_key(build.stage()) {
            return false;
        }
        if let Err(e) = build.run() {
            warn!(stage = %build.stage(), error = %e, "cannot start static build");
            return false;
        }
        info!(stage = %build.stage(), branch = %build.branch(), "added static stage");
        self.stages.insert(build.stage().to_string(), build);
        true
    }

    /// Drain the queue until every handle is dropped.
    pub async fn run(mut self) {
        info!(stages = self.stages.len(), "projects actor started");
        while let Some(req) = self.reqs.recv().await {
            let result = match req {
                ProjectsRequest::Push { build, notif, bot } => self.do_push(build, notif, bot).await,
                ProjectsRequest::Merge { build, notif } => self.do_merge(build, notif).await,
                ProjectsRequest::Stages { reply } => {
                    let mut stages: Vec<String> = self.stages.keys().cloned().collect();
                    stages.sort();
                    let _ = reply.send(stages);
                    Ok(())
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "error processing build action");
            }
        }
        info!("projects actor stopped");
    }

    async fn do_push(
        &mut self,
        build: Build,
        notif: Arc<Notification>,
        bot: MergeBotHandle,
    ) -> Result<(), OrchestratorError> {
        let existing = self.stages.get(build.stage()).cloned();
        let (act, build) = match existing {
            Some(existing) => (BuildAct::Change, existing),
            None => {
                build.run()?;
                self.stages.insert(build.stage().to_string(), build.clone());
                (BuildAct::Create, build)
            }
        };
        info!(
            project = %notif.project,
            stage = %build.stage(),
            branch = %notif.branch,
            sha1 = %notif.sha1,
            %act,
            "push"
        );
        if let Err(e) = build.request(act, notif.clone()).await {
            warn!(stage = %build.stage(), %act, error = %e, "cannot queue build action");
        }
        bot.send(MergeRequest::new(notif, build)).await
    }

    async fn do_merge(&mut self, build: Build, notif: Arc<Notification>) -> Result<(), OrchestratorError> {
        let stage = build.stage();
        info!(stage, merged_by = %notif.sha1, "remove build stage");
        let build = self
            .stages
            .remove(stage)
            .ok_or_else(|| OrchestratorError::UnknownStage(stage.to_string()))?;
        if let Err(e) = build.request(BuildAct::Destroy, notif).await {
            warn!(stage = %build.stage(), error = %e, "cannot queue destroy");
        }
        build.destroy().await;
        debug!(live = self.stages.len(), "stage removed");
        Ok(())
    }
}
