//! Routes a deployment to the model its phase is configured for.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::Result;
use crate::model::{CombineModel, DeployKind, DeployModel, DeployOption, DeployOutput, ModelTable};
use crate::project::{Project, ProjectCatalog};
use crate::registry::ImageTagResolver;

pub struct DeployDispatcher {
    catalog: Arc<ProjectCatalog>,
    models: ModelTable,
}

impl DeployDispatcher {
    /// Build a dispatcher from the step models; the combine model is added
    /// on top and runs its steps through the same table.
    pub fn new(catalog: Arc<ProjectCatalog>, resolver: Arc<ImageTagResolver>, steps: ModelTable) -> Self {
        let combine = CombineModel::new(catalog.clone(), resolver, steps.clone());
        let models = steps.with(DeployKind::Combine, Arc::new(combine));
        Self { catalog, models }
    }

    pub fn catalog(&self) -> &Arc<ProjectCatalog> {
        &self.catalog
    }

    pub fn kind_for(&self, project: &Project, phase: &str) -> Result<DeployKind> {
        Ok(project.kind_of(project.phase(phase)?))
    }

    pub fn model_for(&self, project: &Project, phase: &str) -> Result<Arc<dyn DeployModel>> {
        self.models.get(self.kind_for(project, phase)?)
    }

    #[instrument(skip(self, option), fields(branch = %option.branch))]
    pub async fn deploy(&self, project_id: &str, phase: &str, option: &DeployOption) -> Result<DeployOutput> {
        let project = self.catalog.find(project_id)?;
        let kind = self.kind_for(&project, phase)?;
        info!(kind = %kind, "Dispatching deployment");
        self.models.get(kind)?.deploy(&project, phase, option).await
    }
}
