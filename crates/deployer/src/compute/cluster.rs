//! Kubernetes-backed compute: Deployment inspection and Job execution.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use tracing::{info, instrument};

use super::{JobPhase, JobRef, JobRunner, ServiceInspector};
use crate::error::{DeployError, Result};

pub struct KubeCompute {
    client: Client,
    default_namespace: String,
}

impl KubeCompute {
    pub fn new(client: Client, default_namespace: &str) -> Self {
        Self {
            client,
            default_namespace: default_namespace.to_string(),
        }
    }

    /// Split `namespace/name`, defaulting the namespace.
    fn locate<'a>(&'a self, definition: &'a str) -> (&'a str, &'a str) {
        definition
            .split_once('/')
            .unwrap_or((self.default_namespace.as_str(), definition))
    }
}

#[async_trait]
impl ServiceInspector for KubeCompute {
    #[instrument(skip(self))]
    async fn container_images(&self, definition: &str) -> Result<Vec<String>> {
        let (namespace, name) = self.locate(definition);
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = deployments.get(name).await?;

        Ok(deployment
            .spec
            .and_then(|s| s.template.spec)
            .map(|pod| {
                pod.containers
                    .into_iter()
                    .filter_map(|c| c.image)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl JobRunner for KubeCompute {
    #[instrument(skip(self, job), fields(job = %job.name_any()))]
    async fn submit(&self, job: Job) -> Result<JobRef> {
        let namespace = job
            .namespace()
            .unwrap_or_else(|| self.default_namespace.clone());
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &namespace);

        let created = jobs
            .create(&PostParams::default(), &job)
            .await
            .map_err(|e| DeployError::JobSubmissionFailed(e.to_string()))?;

        let name = created.name_any();
        info!(namespace = %namespace, name = %name, "Submitted job");
        Ok(JobRef { namespace, name })
    }

    async fn status(&self, job: &JobRef) -> Result<JobPhase> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &job.namespace);
        let current = jobs.get(&job.name).await?;
        let status = current.status.unwrap_or_default();

        if status.succeeded.unwrap_or(0) >= 1 {
            Ok(JobPhase::Succeeded)
        } else if status.failed.unwrap_or(0) >= 1 {
            Ok(JobPhase::Failed)
        } else {
            Ok(JobPhase::Running)
        }
    }
}
