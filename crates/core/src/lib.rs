//! Stagekeeper core library.
//!
//! This crate provides the building blocks of the staging daemon:
//! configuration, the build result store, repository queries, the build
//! executors that drive a stage's lifecycle, and the actors that decide when
//! a stage is created, changed, or retired after its branch was merged.

pub mod build;
pub mod config;
pub mod db;
pub mod errors;
pub mod git;
pub mod models;
pub mod orchestrator;

// Re-exports for convenience.
pub use build::{Build, BuildExecutor, BuildFactory, CommandBuild, CommandBuildFactory};
pub use config::AppConfig;
pub use db::Database;
pub use git::{GitClient, VersionControl};
pub use models::{BuildAct, BuildResult, Notification};
pub use orchestrator::Orchestrator;
