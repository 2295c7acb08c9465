//! Shared fixtures for handler tests.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Response;
use axum::Router;

use stagekeeper_core::config::{AppConfig, ProjectConfig};
use stagekeeper_core::{CommandBuildFactory, Database, GitClient, Orchestrator};

use crate::WebServer;

/// A server for project `shop` with a static `master` stage and no commands.
pub struct TestApp {
    pub db: Arc<Database>,
    pub orchestrator: Arc<Orchestrator>,
    server: WebServer,
}

impl TestApp {
    pub async fn start() -> Self {
        let mut project = ProjectConfig::default();
        project.statics = vec!["master".into()];
        let mut config = AppConfig::default();
        config.envs.insert("shop".into(), project);

        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let db = Arc::new(db);
        let factory = CommandBuildFactory::new(&config, db.clone()).unwrap();
        let orchestrator = Arc::new(
            Orchestrator::start(
                &config,
                Arc::new(factory),
                Arc::new(GitClient::new(Duration::from_secs(5))),
            )
            .await,
        );
        let server = WebServer::new(config, db.clone(), orchestrator.clone());
        Self {
            db,
            orchestrator,
            server,
        }
    }

    pub fn router(&self) -> Router {
        self.server.router()
    }
}

pub async fn body_text(resp: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}
