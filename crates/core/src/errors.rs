//! Error types for the stagekeeper core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from version-control queries against a checkout directory.
#[derive(Debug, Error)]
pub enum GitError {
    /// The directory does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A commit could not be resolved in the repository.
    #[error("git commit not found: {0}")]
    CommitNotFound(String),

    /// The repository has no commits on HEAD.
    #[error("git repository at '{0}' has no commits")]
    EmptyHistory(String),

    /// The query did not finish within the configured timeout.
    #[error("git query in '{dir}' timed out after {secs}s")]
    Timeout { dir: String, secs: u64 },

    /// The blocking query task panicked or was cancelled.
    #[error("git query task failed: {0}")]
    TaskFailed(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite result store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A stored value could not be decoded.
    #[error("corrupt {field} in stored build result: {value}")]
    Corrupt { field: String, value: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Build errors
// ---------------------------------------------------------------------------

/// Errors from constructing or driving a stage build.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The project has no `[envs.<project>]` section.
    #[error("no build configuration for project '{0}'")]
    UnknownProject(String),

    /// A stage template expanded to an empty name.
    #[error("stage template '{template}' yields an empty stage name for branch '{branch}'")]
    EmptyStage { template: String, branch: String },

    /// The branch filter is not a valid regular expression.
    #[error("invalid branch filter '{pattern}': {detail}")]
    InvalidFilter { pattern: String, detail: String },

    /// The build's run loop has already stopped, requests cannot be queued.
    #[error("build for stage '{0}' is no longer running")]
    Stopped(String),

    /// The build's run loop was started twice.
    #[error("build for stage '{0}' is already running")]
    AlreadyRunning(String),

    /// A command could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Persisting the result of an action failed.
    #[error("build result store error: {0}")]
    Store(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Orchestrator errors
// ---------------------------------------------------------------------------

/// Errors from the Projects / MergeBot actors and the dispatcher.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A merge was signalled for a stage that is not live.
    #[error("unknown stage {0} merged")]
    UnknownStage(String),

    /// A notification named a project that is not configured.
    #[error("unknown project '{0}'")]
    UnknownProject(String),

    /// An actor's queue is closed; the actor has stopped.
    #[error("{0} actor has stopped")]
    ActorStopped(&'static str),

    /// A build could not be driven.
    #[error("build error: {0}")]
    Build(#[from] BuildError),
}
