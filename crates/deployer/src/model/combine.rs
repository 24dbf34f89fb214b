//! Ordered multi-project deployment sharing one resolved tag.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::{resolve_tag, DeployKind, DeployModel, DeployOption, DeployOutput, ModelTable};
use crate::error::{DeployError, Result};
use crate::project::{Project, ProjectCatalog};
use crate::registry::ImageTagResolver;

pub struct CombineModel {
    catalog: Arc<ProjectCatalog>,
    resolver: Arc<ImageTagResolver>,
    /// Models for the steps; holds no combine model, so steps cannot nest.
    steps: ModelTable,
}

impl CombineModel {
    pub fn new(catalog: Arc<ProjectCatalog>, resolver: Arc<ImageTagResolver>, steps: ModelTable) -> Self {
        Self {
            catalog,
            resolver,
            steps,
        }
    }
}

fn step_failed(step: &Project, index: usize, total: usize, source: DeployError, partial: DeployOutput) -> DeployError {
    DeployError::StepFailed {
        step: step.id.clone(),
        index,
        total,
        source: Box::new(source),
        partial,
    }
}

#[async_trait]
impl DeployModel for CombineModel {
    #[instrument(skip(self, project, option), fields(project = %project.id))]
    async fn deploy(
        &self,
        project: &Project,
        phase: &str,
        option: &DeployOption,
    ) -> Result<DeployOutput> {
        let tag = resolve_tag(&self.resolver, project, phase, option).await?;
        let steps = self.catalog.find_all(&project.steps)?;
        let total = steps.len();

        let step_option = DeployOption {
            tag: Some(tag.clone()),
            ..option.clone()
        };

        let mut messages = Vec::with_capacity(total);
        for (i, step) in steps.iter().enumerate() {
            let index = i + 1;
            let failed = |source: DeployError, messages: &[String]| {
                let partial = DeployOutput::fail(messages.join("\n"));
                step_failed(step, index, total, source, partial)
            };

            let kind = match step.phase(phase) {
                Ok(ph) => step.kind_of(ph),
                Err(e) => return Err(failed(e, &messages)),
            };
            if kind == DeployKind::Combine {
                return Err(failed(DeployError::UnknownKind(kind.to_string()), &messages));
            }
            let model = match self.steps.get(kind) {
                Ok(model) => model,
                Err(e) => return Err(failed(e, &messages)),
            };

            info!(step = %step.id, index, total, "Deploying step");
            match model.deploy(step, phase, &step_option).await {
                Ok(output) if output.is_fail() => {
                    let reason = output.message.clone();
                    messages.push(output.message);
                    return Err(failed(DeployError::DeployFailed(reason), &messages));
                }
                Ok(output) => messages.push(format!("{}: {}", step.id, output.message)),
                Err(e) => return Err(failed(e, &messages)),
            }
        }

        Ok(DeployOutput::success(messages.join("\n")))
    }
}
