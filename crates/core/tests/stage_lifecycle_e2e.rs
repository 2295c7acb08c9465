//! End-to-end tests for the stage lifecycle.
//!
//! These tests exercise the real `Orchestrator` with:
//! - Local Git repos built with git2 (the merge-tracked checkout)
//! - Real `CommandBuild`s running `echo`
//! - An in-memory SQLite result store
//!
//! No network I/O and no shell.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use git2::{Commit, Oid, Repository, Signature};
use tempfile::TempDir;

use stagekeeper_core::config::{AppConfig, ProjectConfig};
use stagekeeper_core::{
    BuildAct, CommandBuildFactory, Database, GitClient, Notification, Orchestrator,
};

// ===========================================================================
// Helpers
// ===========================================================================

/// Commit `file` onto `refname` with the given parents.
fn commit_on(repo: &Repository, refname: &str, parents: &[Oid], file: &str) -> String {
    std::fs::write(repo.workdir().unwrap().join(file), file).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(file)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test", "test@test.com").unwrap();
    let parents: Vec<Commit> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
    let parents: Vec<&Commit> = parents.iter().collect();
    repo.commit(Some(refname), &sig, &sig, file, &tree, &parents)
        .unwrap()
        .to_string()
}

fn oid(sha1: &str) -> Oid {
    Oid::from_str(sha1).unwrap()
}

fn echo(args: &[&str]) -> Vec<String> {
    std::iter::once("echo")
        .chain(args.iter().copied())
        .map(String::from)
        .collect()
}

fn config(checkout: &Path) -> AppConfig {
    let mut project = ProjectConfig::default();
    project.statics = vec!["master".into()];
    project.merges.insert("master".into(), checkout.to_path_buf());
    project.build.commands.create = echo(&["create", "{stage}", "{sha1}"]);
    project.build.commands.update = echo(&["update", "{stage}", "{sha1}"]);
    project.build.commands.change = echo(&["change", "{stage}", "{branch}"]);
    project.build.commands.destroy = echo(&["destroy", "{stage}"]);

    let mut config = AppConfig::default();
    config.envs.insert("shop".into(), project);
    config
}

struct Harness {
    _dir: TempDir,
    repo: Repository,
    base: String,
    db: Arc<Database>,
    orch: Orchestrator,
}

impl Harness {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let base = commit_on(&repo, "HEAD", &[], "base.txt");

        let config = config(dir.path());
        config.validate().unwrap();
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let db = Arc::new(db);
        let factory = CommandBuildFactory::new(&config, db.clone()).unwrap();
        let orch = Orchestrator::start(
            &config,
            Arc::new(factory),
            Arc::new(GitClient::new(Duration::from_secs(10))),
        )
        .await;

        Self {
            _dir: dir,
            repo,
            base,
            db,
            orch,
        }
    }

    /// Poll the result store until `stage` has exactly `n` results.
    async fn wait_for_results(&self, stage: &str, n: usize) -> Vec<BuildAct> {
        for _ in 0..200 {
            let results = self.db.get_results(stage).unwrap();
            if results.len() == n {
                return results.into_iter().map(|r| r.act).collect();
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("stage {stage} never reached {n} results");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_feature_stage_lives_until_merged() {
    let h = Harness::start().await;
    assert_eq!(h.orch.stages().await.unwrap(), vec!["master"]);

    // A feature branch forks off the checkout and is pushed.
    let feature = commit_on(&h.repo, "refs/heads/feature/login", &[oid(&h.base)], "login.txt");
    let scheduled = h
        .orch
        .notify(Notification::new("shop", feature.clone(), "feature/login"))
        .await
        .unwrap();
    assert_eq!(scheduled, 1);
    assert_eq!(h.orch.stages().await.unwrap(), vec!["feature-login", "master"]);
    assert_eq!(h.wait_for_results("feature-login", 1).await, vec![BuildAct::Create]);

    // An unrelated push to master does not retire the stage.
    let hotfix = commit_on(&h.repo, "HEAD", &[oid(&h.base)], "hotfix.txt");
    h.orch
        .notify(Notification::new("shop", hotfix.clone(), "master"))
        .await
        .unwrap();
    assert_eq!(h.wait_for_results("master", 1).await, vec![BuildAct::Update]);
    assert_eq!(h.orch.stages().await.unwrap(), vec!["feature-login", "master"]);

    // The feature is merged into the checkout.
    let merge = commit_on(&h.repo, "HEAD", &[oid(&hotfix), oid(&feature)], "merge.txt");
    h.orch
        .notify(Notification::new("shop", merge.clone(), "master"))
        .await
        .unwrap();

    assert_eq!(
        h.wait_for_results("feature-login", 2).await,
        vec![BuildAct::Create, BuildAct::Destroy]
    );
    assert_eq!(h.orch.stages().await.unwrap(), vec!["master"]);

    let destroyed = h.db.get_results("feature-login").unwrap().pop().unwrap();
    assert_eq!(destroyed.sha1, merge);
    assert_eq!(destroyed.branch, "master");
    assert_eq!(destroyed.stdout.trim(), "destroy feature-login");

    h.orch.shutdown().await;
}

#[tokio::test]
async fn test_repushed_stage_starts_fresh() {
    let h = Harness::start().await;

    let first = commit_on(&h.repo, "refs/heads/topic", &[oid(&h.base)], "topic.txt");
    h.orch
        .notify(Notification::new("shop", first.clone(), "topic"))
        .await
        .unwrap();
    let second = commit_on(&h.repo, "refs/heads/topic", &[oid(&first)], "topic2.txt");
    h.orch
        .notify(Notification::new("shop", second.clone(), "topic"))
        .await
        .unwrap();
    assert_eq!(
        h.wait_for_results("topic", 2).await,
        vec![BuildAct::Create, BuildAct::Update]
    );

    // Fast-forward the checkout onto the topic branch.
    h.repo
        .reference("refs/heads/master", oid(&second), true, "fast-forward")
        .unwrap();
    h.repo.set_head("refs/heads/master").unwrap();
    h.orch
        .notify(Notification::new("shop", second.clone(), "master"))
        .await
        .unwrap();
    assert_eq!(h.wait_for_results("topic", 3).await.last(), Some(&BuildAct::Destroy));
    assert_eq!(h.orch.stages().await.unwrap(), vec!["master"]);

    // Pushing the branch again creates a new stage with a clean history.
    let third = commit_on(&h.repo, "refs/heads/topic", &[oid(&second)], "topic3.txt");
    h.orch
        .notify(Notification::new("shop", third, "topic"))
        .await
        .unwrap();
    assert_eq!(h.wait_for_results("topic", 1).await, vec![BuildAct::Create]);
    assert_eq!(h.orch.stages().await.unwrap(), vec!["master", "topic"]);

    h.orch.shutdown().await;
}

#[tokio::test]
async fn test_uppercase_push_sha_is_still_retired() {
    let h = Harness::start().await;

    let feature = commit_on(&h.repo, "refs/heads/topic", &[oid(&h.base)], "topic.txt");
    h.orch
        .notify(Notification::new("shop", feature.to_uppercase(), "topic"))
        .await
        .unwrap();
    assert_eq!(h.wait_for_results("topic", 1).await, vec![BuildAct::Create]);

    let merge = commit_on(&h.repo, "HEAD", &[oid(&h.base), oid(&feature)], "merge.txt");
    h.orch
        .notify(Notification::new("shop", merge, "master"))
        .await
        .unwrap();
    assert_eq!(
        h.wait_for_results("topic", 2).await,
        vec![BuildAct::Create, BuildAct::Destroy]
    );
    assert_eq!(h.orch.stages().await.unwrap(), vec!["master"]);

    h.orch.shutdown().await;
}

#[tokio::test]
async fn test_unknown_project_is_rejected() {
    let h = Harness::start().await;
    let result = h
        .orch
        .notify(Notification::new("blog", h.base.clone(), "master"))
        .await;
    assert!(result.is_err());
    assert_eq!(h.orch.stages().await.unwrap(), vec!["master"]);
}
