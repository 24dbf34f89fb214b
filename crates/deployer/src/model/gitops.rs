//! Pull-request based deployment against the manifest repository.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::{resolve_tag, DeployModel, DeployOption, DeployOutput};
use crate::clock::Clock;
use crate::destination::DestinationReader;
use crate::error::{DeployError, Result};
use crate::manifest;
use crate::project::{Destination, Project};
use crate::registry::ImageTagResolver;
use crate::scm::{commits_between, format_commits, FileChange, NewPullRequest, PullRequest, SourceControl};

/// Result of preparing a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// The destination already runs `tag`; nothing was created
    Already { tag: String },
    Prepared {
        tag: String,
        branch: String,
        pull_request: PullRequest,
    },
}

/// Working branch for a (project, phase, tag) deployment.
pub fn working_branch(project: &str, phase: &str, tag: &str) -> String {
    format!("bot/docker-image-tag-{project}-{phase}-{tag}")
}

/// Opens a pull request that moves a phase's manifest to a new tag.
///
/// A failure after the branch is created leaves that branch behind; the
/// next preparation of the same tag resets it.
pub struct GitOpsPreparer {
    scm: Arc<dyn SourceControl>,
    resolver: Arc<ImageTagResolver>,
    destinations: Arc<DestinationReader>,
    clock: Arc<dyn Clock>,
    manifest_branch: String,
}

impl GitOpsPreparer {
    pub fn new(
        scm: Arc<dyn SourceControl>,
        resolver: Arc<ImageTagResolver>,
        destinations: Arc<DestinationReader>,
        clock: Arc<dyn Clock>,
        manifest_branch: &str,
    ) -> Self {
        Self {
            scm,
            resolver,
            destinations,
            clock,
            manifest_branch: manifest_branch.to_string(),
        }
    }

    #[instrument(skip(self, project, option), fields(project = %project.id, branch = %option.branch))]
    pub async fn prepare(
        &self,
        project: &Project,
        phase_name: &str,
        option: &DeployOption,
    ) -> Result<PrepareOutcome> {
        let phase = project.phase(phase_name)?;
        let tag = resolve_tag(&self.resolver, project, phase_name, option).await?;

        let destination = phase.destination();
        let current = match self.destinations.current_revision(destination).await {
            Ok(current) => current,
            Err(DeployError::UnsupportedDestination) => String::new(),
            Err(e) => return Err(e),
        };
        if current == tag {
            info!(tag = %tag, "Destination already runs tag");
            return Ok(PrepareOutcome::Already { tag });
        }

        let (path, image) = match destination {
            Destination::Manifest { path, image } => (path.as_str(), image.as_str()),
            _ => (phase.path.as_str(), project.image.as_str()),
        };

        let branch = working_branch(&project.id, phase_name, &tag);
        self.scm.create_branch(&branch, &self.manifest_branch).await?;

        let files = self.rewrite(&branch, path, image, &tag).await?;
        let message = format!(
            "Change docker image tag. target: {path}, phase: {phase_name}, tag: {tag}."
        );
        self.scm.commit_files(&branch, &message, &files).await?;

        let body = self.describe(project, option, &current, &tag).await;
        let pull_request = self
            .scm
            .create_pull_request(&NewPullRequest {
                title: format!("Deploy {} {phase_name}: {} ({tag})", project.id, option.branch),
                body,
                head: branch.clone(),
                base: self.manifest_branch.clone(),
            })
            .await?;

        if let Some(login) = option.user.as_ref().and_then(|u| u.scm_login.as_deref()) {
            if let Err(e) = self.scm.request_review(pull_request.number, login).await {
                warn!(error = %e, reviewer = login, "Failed to request review");
            }
        }

        info!(number = pull_request.number, tag = %tag, "Prepared deployment pull request");
        Ok(PrepareOutcome::Prepared {
            tag,
            branch,
            pull_request,
        })
    }

    /// Updated manifest plus, when present, the refreshed companion ConfigMap.
    async fn rewrite(&self, branch: &str, path: &str, image: &str, tag: &str) -> Result<Vec<FileChange>> {
        let raw = self.scm.get_file(branch, path).await?.unwrap_or_default();
        let mut files = vec![FileChange {
            path: path.to_string(),
            content: manifest::set_image_tag(&raw, image, tag)?,
        }];

        if let Some(companion) = manifest::companion_configmap_path(path) {
            if let Some(raw) = self.scm.get_file(branch, &companion).await? {
                if let Some(content) = manifest::touch_cache_prefix(&raw, self.clock.now())? {
                    files.push(FileChange {
                        path: companion,
                        content,
                    });
                }
            }
        }
        Ok(files)
    }

    async fn describe(&self, project: &Project, option: &DeployOption, current: &str, tag: &str) -> String {
        let mut body = format!("from bot\n\nRequested by {}\n", option.requester());
        if project.repository.is_empty() {
            return body;
        }
        match self.scm.list_commits(&project.repository, &option.branch).await {
            Ok(commits) => {
                let between = commits_between(&commits, current, tag);
                if !between.is_empty() {
                    body.push('\n');
                    body.push_str(&format_commits(&between));
                }
            }
            Err(e) => warn!(error = %e, "Failed to list commits for pull request body"),
        }
        body
    }
}

/// GitOps deployment that merges its pull request immediately.
pub struct GitOpsModel {
    preparer: Arc<GitOpsPreparer>,
    scm: Arc<dyn SourceControl>,
}

impl GitOpsModel {
    pub fn new(preparer: Arc<GitOpsPreparer>, scm: Arc<dyn SourceControl>) -> Self {
        Self { preparer, scm }
    }
}

#[async_trait]
impl DeployModel for GitOpsModel {
    async fn deploy(
        &self,
        project: &Project,
        phase: &str,
        option: &DeployOption,
    ) -> Result<DeployOutput> {
        match self.preparer.prepare(project, phase, option).await? {
            PrepareOutcome::Already { tag } => Ok(DeployOutput::already(format!(
                "{} {phase} already runs {tag}",
                project.id
            ))),
            PrepareOutcome::Prepared { pull_request, .. } => {
                self.scm.merge_pull_request(pull_request.number).await?;
                Ok(DeployOutput::success(format!("merged {}", pull_request.url)))
            }
        }
    }
}
