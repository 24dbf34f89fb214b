//! Deployment mechanisms and their common contract.

pub mod combine;
pub mod gitops;
pub mod invoke;
pub mod job;
pub mod trigger;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use combine::CombineModel;
pub use gitops::{GitOpsModel, GitOpsPreparer, PrepareOutcome};
pub use invoke::InvokeModel;
pub use job::{JobModel, RandomSuffix, SuffixGenerator};
pub use trigger::{TriggerConfig, TriggerModel};

use crate::error::{DeployError, Result};
use crate::project::Project;
use crate::registry::ImageTagResolver;
use crate::user::User;

/// The deployment mechanism a phase uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployKind {
    GitOps,
    Job,
    Invoke,
    Trigger,
    Combine,
}

impl DeployKind {
    /// Whether requests for this kind go through a pull request.
    pub fn uses_pull_request(self) -> bool {
        self == Self::GitOps
    }
}

impl FromStr for DeployKind {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gitops" | "kustomize" => Ok(Self::GitOps),
            "job" => Ok(Self::Job),
            "invoke" | "lambda" | "function" => Ok(Self::Invoke),
            "trigger" | "jenkins" => Ok(Self::Trigger),
            "combine" => Ok(Self::Combine),
            other => Err(DeployError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for DeployKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GitOps => "gitops",
            Self::Job => "job",
            Self::Invoke => "invoke",
            Self::Trigger => "trigger",
            Self::Combine => "combine",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    Success,
    Fail,
    /// The destination already ran the requested revision
    Already,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOutput {
    pub status: DeployStatus,
    pub message: String,
}

impl DeployOutput {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: DeployStatus::Success,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: DeployStatus::Fail,
            message: message.into(),
        }
    }

    pub fn already(message: impl Into<String>) -> Self {
        Self {
            status: DeployStatus::Already,
            message: message.into(),
        }
    }

    pub fn is_fail(&self) -> bool {
        self.status == DeployStatus::Fail
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeployOption {
    pub branch: String,
    /// Pre-resolved tag; resolved from the registry when absent.
    pub tag: Option<String>,
    pub user: Option<User>,
    /// Wait for the mechanism's terminal state before returning.
    pub wait: bool,
}

impl DeployOption {
    pub fn requester(&self) -> &str {
        self.user.as_ref().map_or("deployer", |u| u.display_name.as_str())
    }
}

#[async_trait]
pub trait DeployModel: Send + Sync {
    async fn deploy(&self, project: &Project, phase: &str, option: &DeployOption)
        -> Result<DeployOutput>;
}

/// Deploy models keyed by the kind they implement.
#[derive(Clone, Default)]
pub struct ModelTable {
    models: HashMap<DeployKind, Arc<dyn DeployModel>>,
}

impl ModelTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, kind: DeployKind, model: Arc<dyn DeployModel>) -> Self {
        self.models.insert(kind, model);
        self
    }

    pub fn get(&self, kind: DeployKind) -> Result<Arc<dyn DeployModel>> {
        self.models
            .get(&kind)
            .cloned()
            .ok_or_else(|| DeployError::UnknownKind(kind.to_string()))
    }
}

/// The option's tag, or the one the registry resolves for the branch.
pub(crate) async fn resolve_tag(
    resolver: &ImageTagResolver,
    project: &Project,
    phase: &str,
    option: &DeployOption,
) -> Result<String> {
    match &option.tag {
        Some(tag) => Ok(tag.clone()),
        None => resolver.resolve_for(project, phase, &option.branch).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_with_aliases() {
        assert_eq!("kustomize".parse::<DeployKind>().unwrap(), DeployKind::GitOps);
        assert_eq!("Lambda".parse::<DeployKind>().unwrap(), DeployKind::Invoke);
        assert_eq!("jenkins".parse::<DeployKind>().unwrap(), DeployKind::Trigger);
        assert!(matches!(
            "ecs".parse::<DeployKind>(),
            Err(DeployError::UnknownKind(_))
        ));
    }

    #[test]
    fn missing_model_is_unknown_kind() {
        let table = ModelTable::new();
        assert!(matches!(
            table.get(DeployKind::Job),
            Err(DeployError::UnknownKind(ref k)) if k == "job"
        ));
    }
}
