//! Selects the concrete image tag to deploy for a branch.
//!
//! Tags pointing at the same image form a group. A group is picked when
//! one of its tags matches the filter pattern (usually the branch name);
//! the deployed tag is the group's first tag matching the target pattern
//! (usually a commit hash).

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, instrument};

use super::{ImageGroup, Registry};
use crate::error::{DeployError, Result};
use crate::project::Project;

/// Values substituted into tag patterns.
#[derive(Debug, Clone, Copy)]
pub struct TagVars<'a> {
    pub branch: &'a str,
    pub phase: &'a str,
}

/// Substitute `{Branch}` and `{Phase}` into a pattern and compile it.
///
/// Braces that do not hold an identifier, such as the `{5,40}` quantifier,
/// are left alone. Substituted values are escaped and `/` in branch names
/// becomes `_`, matching how CI tags images.
pub fn render_pattern(template: &str, vars: TagVars<'_>) -> Result<Regex> {
    let placeholder = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| DeployError::TemplateError(e.to_string()))?;

    let mut unknown = None;
    let rendered = placeholder.replace_all(template, |caps: &regex::Captures<'_>| {
        match &caps[1] {
            "Branch" => regex::escape(&vars.branch.replace('/', "_")),
            "Phase" => regex::escape(vars.phase),
            other => {
                unknown.get_or_insert_with(|| other.to_string());
                String::new()
            }
        }
    });

    if let Some(name) = unknown {
        return Err(DeployError::TemplateError(format!(
            "unknown variable {{{name}}} in {template}"
        )));
    }

    Regex::new(&rendered).map_err(|e| DeployError::TemplateError(e.to_string()))
}

/// First target-matching tag of the first group with a filter-matching tag.
pub fn select_tag(groups: &[ImageGroup], filter: &Regex, target: &Regex) -> Option<String> {
    groups
        .iter()
        .filter(|g| g.tags.iter().any(|t| filter.is_match(t)))
        .find_map(|g| g.tags.iter().find(|t| target.is_match(t)).cloned())
}

pub struct ImageTagResolver {
    registry: Arc<dyn Registry>,
}

impl ImageTagResolver {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    #[instrument(skip(self, filter, target))]
    pub async fn resolve(
        &self,
        repository: &str,
        filter: &str,
        target: &str,
        branch: &str,
        phase: &str,
    ) -> Result<String> {
        let vars = TagVars { branch, phase };
        let filter = render_pattern(filter, vars)?;
        let target = render_pattern(target, vars)?;

        let groups = self.registry.list_images(repository).await?;
        debug!(groups = groups.len(), "Listed image groups");

        select_tag(&groups, &filter, &target).ok_or(DeployError::ImageTagNotFound)
    }

    /// Resolve using a project's registry repository and patterns.
    pub async fn resolve_for(&self, project: &Project, phase: &str, branch: &str) -> Result<String> {
        self.resolve(
            project.registry_repository(),
            project.tag_filter(),
            project.tag_target(),
            branch,
            phase,
        )
        .await
    }
}
