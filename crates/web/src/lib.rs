//! Stagekeeper web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - The push-notification ingress (Jenkins git plugin compatible)
//! - Live stage listing and per-stage build results
//! - Health endpoint

pub mod api;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use stagekeeper_core::config::AppConfig;
use stagekeeper_core::db::Database;
use stagekeeper_core::Orchestrator;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub db: Arc<Database>,
    pub config: AppConfig,
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server with the given dependencies.
    pub fn new(config: AppConfig, db: Arc<Database>, orchestrator: Arc<Orchestrator>) -> Self {
        let state = Arc::new(AppState {
            orchestrator,
            db,
            config,
        });
        Self { state }
    }

    /// The application router with all routes and middleware.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(api::status::routes())
            .merge(api::stages::routes())
            .merge(api::webhooks::routes())
            .layer(DefaultBodyLimit::max(64 * 1024))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve on `listen_addr` until `shutdown` resolves, then finish the
    /// in-flight requests and return.
    pub async fn start<F>(self, listen_addr: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listen_addr.parse()?;
        let app = self.router();

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("web server stopped");
        Ok(())
    }
}
