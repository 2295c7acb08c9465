//! Stage builds: the executor contract driven by the orchestrator and the
//! factory that turns a push into stages.

pub mod command;
pub mod factory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::BuildError;
use crate::models::{BuildAct, Notification};

pub use command::CommandBuild;
pub use factory::CommandBuildFactory;

/// Shared reference to a stage build.
pub type Build = Arc<dyn BuildExecutor>;

/// One stage's deployment, driven through lifecycle actions.
///
/// Implementations own a queue of actions and a run loop draining it; the
/// orchestrator starts the loop once, feeds it actions, and destroys it once.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Stage id, unique among live stages.
    fn stage(&self) -> &str;

    /// Branch the build was created for.
    fn branch(&self) -> &str;

    /// Start the run loop.
    fn run(&self) -> Result<(), BuildError>;

    /// Queue a lifecycle action for the run loop.
    async fn request(&self, act: BuildAct, notif: Arc<Notification>) -> Result<(), BuildError>;

    /// Stop accepting actions. Actions already queued still run.
    async fn destroy(&self);
}

/// Builds the stages a notification maps to. A branch may fan out to several
/// stages, or to none.
pub trait BuildFactory: Send + Sync {
    fn builds(&self, notif: &Arc<Notification>) -> Result<Vec<Build>, BuildError>;
}
