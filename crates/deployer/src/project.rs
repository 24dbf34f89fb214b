//! Project catalog: deployable projects, their phases and destinations.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};
use crate::model::DeployKind;
use crate::user::User;

/// Tag filter used when a project does not set one.
pub const DEFAULT_TAG_FILTER: &str = "^{Branch}$";

/// Tag target used when a project does not set one.
pub const DEFAULT_TAG_TARGET: &str = r"\b[0-9a-f]{5,40}\b";

pub const DEFAULT_BRANCH: &str = "master";

/// Where a phase's running revision can be read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Destination {
    /// A kustomization-style manifest in the manifest repository
    #[serde(rename_all = "camelCase")]
    Manifest {
        #[serde(default)]
        path: String,
        #[serde(default)]
        image: String,
    },
    /// A running service whose containers reference the image
    #[serde(rename_all = "camelCase")]
    ComputeService { definition: String, image: String },
    Unsupported,
}

const UNSUPPORTED: Destination = Destination::Unsupported;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
    /// Manifest path inside the manifest repository.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub auto_deploy: bool,
    #[serde(default)]
    pub notify_channel: Option<String>,
    /// Payload template for function invocations.
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub destination: Option<Destination>,
}

impl Phase {
    pub fn destination(&self) -> &Destination {
        self.destination.as_ref().unwrap_or(&UNSUPPORTED)
    }

    /// Canonical phase name for the common short forms.
    pub fn normalize_name(name: &str) -> String {
        match name.to_ascii_lowercase().as_str() {
            "pro" | "prd" | "prod" | "production" => "production".to_string(),
            "stg" | "staging" => "staging".to_string(),
            "sandbox" => "sandbox".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub kind: Option<String>,
    /// Regex of alternative names accepted in chat commands.
    #[serde(default)]
    pub alias: Option<String>,
    /// Application source repository as `owner/name`.
    #[serde(default)]
    pub repository: String,
    /// Image repository reference, e.g. `ghcr.io/acme/api`.
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub tag_filter: Option<String>,
    #[serde(default)]
    pub tag_target: Option<String>,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub trigger_job: Option<String>,
    #[serde(default)]
    pub disable_branch_deploy: bool,
    /// Project ids deployed in order by a combined project.
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub phases: Vec<Phase>,
}

impl Project {
    pub fn default_branch(&self) -> &str {
        self.default_branch
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BRANCH)
    }

    pub fn tag_filter(&self) -> &str {
        self.tag_filter.as_deref().unwrap_or(DEFAULT_TAG_FILTER)
    }

    pub fn tag_target(&self) -> &str {
        self.tag_target.as_deref().unwrap_or(DEFAULT_TAG_TARGET)
    }

    /// Repository path inside the registry (host stripped).
    pub fn registry_repository(&self) -> &str {
        match self.image.split_once('/') {
            Some((host, rest)) if host.contains('.') || host.contains(':') => rest,
            _ => &self.image,
        }
    }

    pub fn phase(&self, name: &str) -> Result<&Phase> {
        self.phases
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| DeployError::PhaseNotFound {
                project: self.id.clone(),
                phase: name.to_string(),
            })
    }

    /// Branch to deploy for a request; branch deploys may be disabled.
    pub fn effective_branch(&self, requested: Option<&str>) -> String {
        match requested {
            Some(b) if !b.is_empty() && !self.disable_branch_deploy => b.to_string(),
            _ => self.default_branch().to_string(),
        }
    }

    /// Deploy kind of a phase: the phase's own kind if known, then the
    /// project's, then the external trigger.
    pub fn kind_of(&self, phase: &Phase) -> DeployKind {
        phase
            .kind
            .as_deref()
            .and_then(|k| k.parse().ok())
            .or_else(|| self.kind.as_deref().and_then(|k| k.parse().ok()))
            .unwrap_or(DeployKind::Trigger)
    }

    fn matches(&self, name: &str) -> bool {
        if self.id == name {
            return true;
        }
        self.alias
            .as_deref()
            .and_then(|a| Regex::new(a).ok())
            .is_some_and(|re| re.is_match(name))
    }

    /// Fill destination defaults and canonical phase names.
    fn normalize(&mut self) -> Result<()> {
        if let Some(alias) = &self.alias {
            Regex::new(alias).map_err(|e| {
                DeployError::Config(format!("project {} has invalid alias: {e}", self.id))
            })?;
        }
        let project_kind = self.kind.clone();
        for phase in &mut self.phases {
            phase.name = Phase::normalize_name(&phase.name);
            if phase.kind.is_none() {
                phase.kind.clone_from(&project_kind);
            }
            let kind = phase.kind.as_deref().and_then(|k| k.parse::<DeployKind>().ok());
            if phase.destination.is_none() && kind == Some(DeployKind::GitOps) {
                phase.destination = Some(Destination::Manifest {
                    path: String::new(),
                    image: String::new(),
                });
            }
            if let Some(Destination::Manifest { path, image }) = &mut phase.destination {
                if path.is_empty() {
                    path.clone_from(&phase.path);
                }
                if image.is_empty() {
                    image.clone_from(&self.image);
                }
            }
        }
        Ok(())
    }
}

/// The configuration document the catalog and user directory load from.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub users: Vec<User>,
}

impl CatalogDocument {
    pub fn parse(yaml: &str) -> Result<Self> {
        let mut doc: Self = serde_yaml::from_str(yaml)?;
        let mut seen = HashSet::new();
        for project in &mut doc.projects {
            if !seen.insert(project.id.clone()) {
                return Err(DeployError::Config(format!(
                    "duplicate project id {}",
                    project.id
                )));
            }
            project.normalize()?;
        }
        Ok(doc)
    }

    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DeployError::Config(format!("cannot read {path}: {e}")))?;
        Self::parse(&raw)
    }
}

/// Thread-safe, reloadable set of projects.
#[derive(Debug, Default)]
pub struct ProjectCatalog {
    projects: RwLock<Vec<Project>>,
}

impl ProjectCatalog {
    pub fn new(projects: Vec<Project>) -> Self {
        Self {
            projects: RwLock::new(projects),
        }
    }

    /// Swap in a freshly loaded project list.
    pub fn replace(&self, projects: Vec<Project>) {
        *self.projects.write().unwrap_or_else(PoisonError::into_inner) = projects;
    }

    pub fn all(&self) -> Vec<Project> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn find(&self, id: &str) -> Result<Project> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| DeployError::ProjectNotFound(id.to_string()))
    }

    /// Resolve a chat-supplied name by id or alias.
    pub fn find_by_alias(&self, name: &str) -> Option<Project> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.matches(name))
            .cloned()
    }

    /// Look up several projects, preserving the requested order.
    pub fn find_all(&self, ids: &[String]) -> Result<Vec<Project>> {
        ids.iter().map(|id| self.find(id)).collect()
    }

    /// Every (project, phase) pair with automatic deploys enabled.
    pub fn auto_deploy_targets(&self) -> Vec<(String, String)> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flat_map(|p| {
                p.phases
                    .iter()
                    .filter(|ph| ph.auto_deploy)
                    .map(|ph| (p.id.clone(), ph.name.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
projects:
  - id: api
    kind: gitops
    alias: "^(api|backend)$"
    repository: acme/api
    image: ghcr.io/acme/api
    defaultBranch: main
    phases:
      - name: stg
        path: overlays/staging/kustomization.yaml
        autoDeploy: true
        notifyChannel: C-STAGING
      - name: prd
        kind: job
        path: jobs/migrate.yaml
  - id: worker
    image: worker
    disableBranchDeploy: true
    phases:
      - name: production
        destination:
          kind: computeService
          definition: default/worker
          image: 1234.dkr.ecr.local/worker
  - id: release
    kind: combine
    steps: [worker, api]
    phases:
      - name: production
users:
  - chatId: U1
    displayName: alice
    role: developer
"#;

    fn catalog() -> ProjectCatalog {
        ProjectCatalog::new(CatalogDocument::parse(CATALOG).unwrap().projects)
    }

    #[test]
    fn phase_names_and_destinations_are_normalized() {
        let api = catalog().find("api").unwrap();
        let staging = api.phase("staging").unwrap();
        assert_eq!(
            staging.destination(),
            &Destination::Manifest {
                path: "overlays/staging/kustomization.yaml".to_string(),
                image: "ghcr.io/acme/api".to_string(),
            }
        );
        assert_eq!(api.kind_of(staging), DeployKind::GitOps);

        let production = api.phase("production").unwrap();
        assert_eq!(production.destination(), &Destination::Unsupported);
        assert_eq!(api.kind_of(production), DeployKind::Job);
    }

    #[test]
    fn unknown_kinds_fall_back_to_trigger() {
        let worker = catalog().find("worker").unwrap();
        let phase = worker.phase("production").unwrap();
        assert_eq!(worker.kind_of(phase), DeployKind::Trigger);
    }

    #[test]
    fn alias_lookup() {
        let catalog = catalog();
        assert_eq!(catalog.find_by_alias("backend").unwrap().id, "api");
        assert_eq!(catalog.find_by_alias("worker").unwrap().id, "worker");
        assert!(catalog.find_by_alias("frontend").is_none());
    }

    #[test]
    fn find_all_preserves_order() {
        let steps = catalog().find("release").unwrap().steps;
        let ids: Vec<_> = catalog()
            .find_all(&steps)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, ["worker", "api"]);
        assert!(matches!(
            catalog().find_all(&["nope".to_string()]),
            Err(DeployError::ProjectNotFound(_))
        ));
    }

    #[test]
    fn defaults() {
        let catalog = catalog();
        let api = catalog.find("api").unwrap();
        assert_eq!(api.default_branch(), "main");
        assert_eq!(api.tag_filter(), DEFAULT_TAG_FILTER);
        assert_eq!(api.registry_repository(), "acme/api");
        assert_eq!(api.effective_branch(Some("feature/x")), "feature/x");

        let worker = catalog.find("worker").unwrap();
        assert_eq!(worker.default_branch(), DEFAULT_BRANCH);
        assert_eq!(worker.registry_repository(), "worker");
        assert_eq!(worker.effective_branch(Some("feature/x")), "master");
    }

    #[test]
    fn auto_deploy_targets_listed() {
        assert_eq!(
            catalog().auto_deploy_targets(),
            vec![("api".to_string(), "staging".to_string())]
        );
    }

    #[test]
    fn duplicate_ids_rejected() {
        let yaml = "projects:\n  - id: a\n  - id: a\n";
        assert!(matches!(
            CatalogDocument::parse(yaml),
            Err(DeployError::Config(_))
        ));
    }
}
