//! Build executor running the configured command for each action.
//!
//! Commands are argv vectors run directly, never through a shell. Every
//! action is recorded in the result store with its captured output, so the
//! history of a stage can be inspected after the fact.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::BuildExecutor;
use crate::config::CommandsConfig;
use crate::db::Database;
use crate::errors::BuildError;
use crate::models::{BuildAct, BuildResult, Notification};

const QUEUE_CAPACITY: usize = 32;

struct BuildRequest {
    act: BuildAct,
    notif: Arc<Notification>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A stage whose actions are shell-free commands.
pub struct CommandBuild {
    project: String,
    stage: String,
    branch: String,
    commands: Arc<CommandsConfig>,
    store: Arc<Database>,
    tx: Mutex<Option<mpsc::Sender<BuildRequest>>>,
    rx: Mutex<Option<mpsc::Receiver<BuildRequest>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CommandBuild {
    pub fn new(
        project: impl Into<String>,
        stage: impl Into<String>,
        branch: impl Into<String>,
        commands: Arc<CommandsConfig>,
        store: Arc<Database>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            project: project.into(),
            stage: stage.into(),
            branch: branch.into(),
            commands,
            store,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            handle: Mutex::new(None),
        }
    }

    /// Wait for the run loop to drain its queue and stop. Only returns after
    /// [`BuildExecutor::destroy`] has been called.
    pub async fn wait(&self) {
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(stage = %self.stage, error = %e, "build run loop panicked");
            }
        }
    }
}

#[async_trait]
impl BuildExecutor for CommandBuild {
    fn stage(&self) -> &str {
        &self.stage
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    fn run(&self) -> Result<(), BuildError> {
        let rx = lock(&self.rx)
            .take()
            .ok_or_else(|| BuildError::AlreadyRunning(self.stage.clone()))?;
        let runner = Runner {
            project: self.project.clone(),
            stage: self.stage.clone(),
            last_branch: self.branch.clone(),
            commands: self.commands.clone(),
            store: self.store.clone(),
        };
        *lock(&self.handle) = Some(tokio::spawn(runner.run(rx)));
        debug!(stage = %self.stage, "build run loop started");
        Ok(())
    }

    async fn request(&self, act: BuildAct, notif: Arc<Notification>) -> Result<(), BuildError> {
        let tx = lock(&self.tx)
            .clone()
            .ok_or_else(|| BuildError::Stopped(self.stage.clone()))?;
        tx.send(BuildRequest { act, notif })
            .await
            .map_err(|_| BuildError::Stopped(self.stage.clone()))
    }

    async fn destroy(&self) {
        lock(&self.tx).take();
        info!(stage = %self.stage, "build closed");
    }
}

struct Runner {
    project: String,
    stage: String,
    last_branch: String,
    commands: Arc<CommandsConfig>,
    store: Arc<Database>,
}

impl Runner {
    async fn run(mut self, mut rx: mpsc::Receiver<BuildRequest>) {
        while let Some(req) = rx.recv().await {
            if let Err(e) = self.handle(req).await {
                warn!(stage = %self.stage, error = %e, "build action failed");
            }
        }
        debug!(stage = %self.stage, "build run loop stopped");
    }

    async fn handle(&mut self, req: BuildRequest) -> Result<(), BuildError> {
        // A change to the branch already deployed is only an update.
        let act = match req.act {
            BuildAct::Change if self.last_branch == req.notif.branch => BuildAct::Update,
            act => act,
        };
        if act == BuildAct::Create {
            self.store.delete_results(&self.stage)?;
        }

        let result = self.execute(act, &req.notif).await;
        if result.succeeded() {
            info!(stage = %self.stage, %act, sha1 = %result.sha1, "build action done");
        } else {
            warn!(
                stage = %self.stage,
                %act,
                retval = result.retval,
                stderr = %result.stderr,
                "build action exited with failure"
            );
        }
        self.store.add_result(&result)?;
        self.last_branch = req.notif.branch.clone();
        Ok(())
    }

    async fn execute(&self, act: BuildAct, notif: &Notification) -> BuildResult {
        let argv: Vec<String> = self
            .commands
            .for_act(act)
            .iter()
            .map(|arg| self.expand(arg, notif))
            .collect();
        let start = Utc::now();
        let mut result = BuildResult {
            start,
            end: start,
            act,
            stdout: String::new(),
            stderr: String::new(),
            retval: 0,
            cmd: argv.join(" "),
            stage: self.stage.clone(),
            branch: notif.branch.clone(),
            sha1: notif.sha1.clone(),
        };

        let Some((program, args)) = argv.split_first() else {
            debug!(stage = %self.stage, %act, "no command configured");
            return result;
        };

        debug!(cmd = %result.cmd, "running build command");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;
        match output {
            Ok(output) => {
                result.stdout = String::from_utf8_lossy(&output.stdout).to_string();
                result.stderr = String::from_utf8_lossy(&output.stderr).to_string();
                result.retval = output.status.code().unwrap_or(-1);
            }
            Err(source) => {
                let err = BuildError::Spawn {
                    program: program.clone(),
                    source,
                };
                result.stderr = err.to_string();
                result.retval = -1;
            }
        }
        result.end = Utc::now();
        result
    }

    fn expand(&self, template: &str, notif: &Notification) -> String {
        template
            .replace("{project}", &self.project)
            .replace("{stage}", &self.stage)
            .replace("{branch}", &notif.branch)
            .replace("{sha1}", &notif.sha1)
    }
}
