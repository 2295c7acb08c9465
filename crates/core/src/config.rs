//! TOML-based configuration system for stagekeeper.
//!
//! The file has three parts: daemon settings, web ingress settings, and one
//! `[envs.<project>]` table per managed project describing its merge-tracked
//! checkouts, its statically provisioned branches and how branches map to
//! stages and commands.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::models::BuildAct;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Push ingress settings.
    #[serde(default)]
    pub web: WebConfig,

    /// Managed projects, keyed by project name.
    #[serde(default)]
    pub envs: BTreeMap<String, ProjectConfig>,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (the result database).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Days to keep build results; 0 keeps them forever.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Seconds between result purges.
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,

    /// Upper bound on a single version-control query.
    #[serde(default = "default_vcs_timeout")]
    pub vcs_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/stagekeeper")
}
fn default_retention_days() -> u64 {
    30
}
fn default_purge_interval() -> u64 {
    3600
}
fn default_vcs_timeout() -> u64 {
    60
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
            purge_interval_secs: default_purge_interval(),
            vcs_timeout_secs: default_vcs_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Web ingress
// ---------------------------------------------------------------------------

/// Push ingress configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Listen address (default `127.0.0.1:3000`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Branch assumed when a push notification names none.
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

fn default_listen() -> String {
    "127.0.0.1:3000".into()
}
fn default_branch() -> String {
    "master".into()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            default_branch: default_branch(),
        }
    }
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// Per-project configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Integration branches tracked for merge detection: branch -> checkout
    /// directory.
    #[serde(default)]
    pub merges: BTreeMap<String, PathBuf>,

    /// Branches whose stages exist from startup.
    #[serde(default)]
    pub statics: Vec<String>,

    /// How branches become stages.
    #[serde(default)]
    pub build: BuildConfig,
}

/// Mapping from a pushed branch to stages and the commands run for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Optional regex; branches that do not match produce no stages.
    #[serde(default)]
    pub branches: Option<String>,

    /// Stage name templates. Each template yields one stage per branch.
    /// Placeholders: `{project}`, `{branch}`.
    #[serde(default = "default_stages")]
    pub stages: Vec<String>,

    /// Command run for each lifecycle action.
    #[serde(default)]
    pub commands: CommandsConfig,
}

fn default_stages() -> Vec<String> {
    vec!["{branch}".into()]
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            branches: None,
            stages: default_stages(),
            commands: CommandsConfig::default(),
        }
    }
}

/// Argv templates per action. Placeholders: `{project}`, `{stage}`,
/// `{branch}`, `{sha1}`. An empty argv records the action without running
/// anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default)]
    pub create: Vec<String>,
    #[serde(default)]
    pub update: Vec<String>,
    #[serde(default)]
    pub change: Vec<String>,
    #[serde(default)]
    pub destroy: Vec<String>,
}

impl CommandsConfig {
    pub fn for_act(&self, act: BuildAct) -> &[String] {
        match act {
            BuildAct::Create => &self.create,
            BuildAct::Update => &self.update,
            BuildAct::Change => &self.change,
            BuildAct::Destroy => &self.destroy,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!(projects = config.envs.len(), "configuration parsed successfully");
        Ok(config)
    }

    /// Validate the structure of the configuration.
    ///
    /// Checkout directories are not inspected here: an unusable checkout is
    /// reported at startup and only that branch is skipped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.web.default_branch.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "web.default_branch".into(),
                detail: "default branch must not be empty".into(),
            });
        }
        if self.daemon.vcs_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "daemon.vcs_timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        if self.daemon.purge_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "daemon.purge_interval_secs".into(),
                detail: "purge interval must be > 0".into(),
            });
        }

        for (name, project) in &self.envs {
            if name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "envs".into(),
                    detail: "project name must not be empty".into(),
                });
            }
            if project.build.stages.iter().any(|s| s.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("envs.{name}.build.stages"),
                    detail: "stage templates must not be empty".into(),
                });
            }
            if let Some(ref pattern) = project.build.branches {
                regex_lite::Regex::new(pattern).map_err(|e| ConfigError::InvalidValue {
                    field: format!("envs.{name}.build.branches"),
                    detail: e.to_string(),
                })?;
            }
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.envs.get(name)
    }
}
