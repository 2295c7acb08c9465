//! Maps a pushed branch to the stages configured for its project.

use std::collections::HashMap;
use std::sync::Arc;

use regex_lite::Regex;
use tracing::debug;

use super::{Build, BuildFactory, CommandBuild};
use crate::config::{AppConfig, CommandsConfig};
use crate::db::Database;
use crate::errors::BuildError;
use crate::models::Notification;

struct ProjectBuilds {
    filter: Option<Regex>,
    stages: Vec<String>,
    commands: Arc<CommandsConfig>,
}

/// Creates a [`CommandBuild`] per stage template of the pushed project.
pub struct CommandBuildFactory {
    projects: HashMap<String, ProjectBuilds>,
    store: Arc<Database>,
}

impl CommandBuildFactory {
    pub fn new(config: &AppConfig, store: Arc<Database>) -> Result<Self, BuildError> {
        let mut projects = HashMap::new();
        for (name, project) in &config.envs {
            let filter = project
                .build
                .branches
                .as_deref()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|e| BuildError::InvalidFilter {
                        pattern: pattern.to_string(),
                        detail: e.to_string(),
                    })
                })
                .transpose()?;
            projects.insert(
                name.clone(),
                ProjectBuilds {
                    filter,
                    stages: project.build.stages.clone(),
                    commands: Arc::new(project.build.commands.clone()),
                },
            );
        }
        Ok(Self { projects, store })
    }
}

impl BuildFactory for CommandBuildFactory {
    fn builds(&self, notif: &Arc<Notification>) -> Result<Vec<Build>, BuildError> {
        let project = self
            .projects
            .get(&notif.project)
            .ok_or_else(|| BuildError::UnknownProject(notif.project.clone()))?;

        if let Some(ref filter) = project.filter {
            if !filter.is_match(&notif.branch) {
                debug!(project = %notif.project, branch = %notif.branch, "branch not built");
                return Ok(Vec::new());
            }
        }

        let mut builds: Vec<Build> = Vec::with_capacity(project.stages.len());
        for template in &project.stages {
            let stage = stage_name(template, &notif.project, &notif.branch);
            if stage.is_empty() {
                return Err(BuildError::EmptyStage {
                    template: template.clone(),
                    branch: notif.branch.clone(),
                });
            }
            if builds.iter().any(|b| b.stage() == stage) {
                continue;
            }
            builds.push(Arc::new(CommandBuild::new(
                notif.project.clone(),
                stage,
                notif.branch.clone(),
                project.commands.clone(),
                self.store.clone(),
            )));
        }
        Ok(builds)
    }
}

/// Expand a stage template and reduce it to `[a-z0-9-]`.
pub fn stage_name(template: &str, project: &str, branch: &str) -> String {
    let expanded = template
        .replace("{project}", project)
        .replace("{branch}", branch)
        .to_lowercase();
    let mut name = String::with_capacity(expanded.len());
    for c in expanded.chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '-' };
        if c == '-' && name.ends_with('-') {
            continue;
        }
        name.push(c);
    }
    name.trim_matches('-').to_string()
}
