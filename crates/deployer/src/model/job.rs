//! One-off cluster Job run from a template in the manifest repository.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use super::{resolve_tag, DeployModel, DeployOption, DeployOutput};
use crate::compute::{JobPhase, JobRef, JobRunner};
use crate::destination::DestinationReader;
use crate::error::{DeployError, Result};
use crate::manifest;
use crate::project::Project;
use crate::registry::ImageTagResolver;
use crate::scm::SourceControl;

const SUFFIX_LEN: usize = 10;
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Source of the unique suffix appended to Job names.
pub trait SuffixGenerator: Send + Sync {
    fn suffix(&self) -> String;
}

/// Ten random lowercase alphanumerics, valid in resource names.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSuffix;

impl SuffixGenerator for RandomSuffix {
    fn suffix(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..SUFFIX_LEN)
            .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
            .collect()
    }
}

pub struct JobModel {
    scm: Arc<dyn SourceControl>,
    resolver: Arc<ImageTagResolver>,
    destinations: Arc<DestinationReader>,
    jobs: Arc<dyn JobRunner>,
    suffix: Arc<dyn SuffixGenerator>,
    manifest_branch: String,
    poll_interval: Duration,
}

impl JobModel {
    pub fn new(
        scm: Arc<dyn SourceControl>,
        resolver: Arc<ImageTagResolver>,
        destinations: Arc<DestinationReader>,
        jobs: Arc<dyn JobRunner>,
        suffix: Arc<dyn SuffixGenerator>,
        manifest_branch: &str,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scm,
            resolver,
            destinations,
            jobs,
            suffix,
            manifest_branch: manifest_branch.to_string(),
            poll_interval,
        }
    }

    /// Poll a submitted Job until it succeeds or fails. A status read
    /// error ends the watch, since a deleted Job never turns terminal.
    #[instrument(skip(self, job), fields(job = %job.name))]
    pub async fn watch(&self, job: &JobRef) -> Result<DeployOutput> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            match self.jobs.status(job).await {
                Ok(JobPhase::Succeeded) => {
                    info!("Job succeeded");
                    return Ok(DeployOutput::success(describe(job)));
                }
                Ok(JobPhase::Failed) => {
                    warn!("Job failed");
                    return Err(DeployError::JobTerminalFailure {
                        namespace: job.namespace.clone(),
                        name: job.name.clone(),
                    });
                }
                Ok(JobPhase::Running) => debug!("Job still running"),
                Err(e) => {
                    warn!(error = %e, "Failed to read job status, giving up");
                    return Err(e);
                }
            }
        }
    }

    /// Submit the Job and return without waiting.
    pub async fn submit(&self, project: &Project, phase: &str, option: &DeployOption) -> Result<Option<JobRef>> {
        let ph = project.phase(phase)?;
        let tag = resolve_tag(&self.resolver, project, phase, option).await?;
        if self.destinations.is_deployed(ph.destination(), &tag).await? {
            return Ok(None);
        }

        let raw = self
            .scm
            .get_file(&self.manifest_branch, &ph.path)
            .await?
            .ok_or_else(|| DeployError::Config(format!("job template {} not found", ph.path)))?;
        let job = manifest::prepare_job(&raw, &project.image, &tag, &self.suffix.suffix())?;

        let job_ref = self.jobs.submit(job).await?;
        Ok(Some(job_ref))
    }
}

fn describe(job: &JobRef) -> String {
    format!("*Namespace*: {}\n*Name*: {}", job.namespace, job.name)
}

#[async_trait]
impl DeployModel for JobModel {
    async fn deploy(
        &self,
        project: &Project,
        phase: &str,
        option: &DeployOption,
    ) -> Result<DeployOutput> {
        let Some(job) = self.submit(project, phase, option).await? else {
            return Ok(DeployOutput::already(format!(
                "{} {phase} already runs the requested tag",
                project.id
            )));
        };
        if option.wait {
            self.watch(&job).await
        } else {
            Ok(DeployOutput::success(describe(&job)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeployStatus;
    use crate::project::CatalogDocument;
    use crate::testing::{FakeJobs, FakeRegistry, FakeScm, FakeServices, FixedSuffix};

    const TEMPLATE: &str = r"
apiVersion: batch/v1
kind: Job
metadata:
  name: migrate
  namespace: jobs
spec:
  template:
    spec:
      restartPolicy: Never
      containers:
        - name: app
          image: ghcr.io/acme/api
";

    fn project() -> Project {
        CatalogDocument::parse(
            r"
projects:
  - id: api
    kind: job
    image: ghcr.io/acme/api
    phases:
      - name: production
        path: jobs/migrate.yaml
",
        )
        .unwrap()
        .projects
        .remove(0)
    }

    fn model(jobs: Arc<FakeJobs>) -> JobModel {
        let scm = Arc::new(FakeScm::new());
        scm.put_file("master", "jobs/migrate.yaml", TEMPLATE);
        let resolver = Arc::new(ImageTagResolver::new(Arc::new(FakeRegistry::default())));
        let destinations = Arc::new(DestinationReader::new(
            scm.clone(),
            Arc::new(FakeServices::default()),
            "master",
        ));
        JobModel::new(
            scm,
            resolver,
            destinations,
            jobs,
            Arc::new(FixedSuffix("x7k2p9q0ab".to_string())),
            "master",
            Duration::from_secs(20),
        )
    }

    fn option(wait: bool) -> DeployOption {
        DeployOption {
            branch: "master".to_string(),
            tag: Some("a1b2c3d".to_string()),
            wait,
            ..DeployOption::default()
        }
    }

    #[test]
    fn random_suffix_shape() {
        let suffix = RandomSuffix.suffix();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[tokio::test]
    async fn submits_pinned_job_without_waiting() {
        let jobs = Arc::new(FakeJobs::new(vec![]));
        let output = model(jobs.clone())
            .deploy(&project(), "production", &option(false))
            .await
            .unwrap();

        assert_eq!(output.status, DeployStatus::Success);
        assert_eq!(output.message, "*Namespace*: jobs\n*Name*: migrate-x7k2p9q0ab");
        let submitted = jobs.submitted();
        assert_eq!(submitted.len(), 1);
        let containers = &submitted[0]
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers;
        assert_eq!(containers[0].image.as_deref(), Some("ghcr.io/acme/api:a1b2c3d"));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_job_succeeds() {
        let jobs = Arc::new(FakeJobs::new(vec![
            JobPhase::Running,
            JobPhase::Running,
            JobPhase::Succeeded,
        ]));
        let output = model(jobs.clone())
            .deploy(&project(), "production", &option(true))
            .await
            .unwrap();
        assert_eq!(output.status, DeployStatus::Success);
        assert_eq!(jobs.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_job_ends_the_watch() {
        let jobs = Arc::new(FakeJobs::vanished());
        let result = tokio::time::timeout(
            Duration::from_secs(24 * 60 * 60),
            model(jobs.clone()).deploy(&project(), "production", &option(true)),
        )
        .await
        .expect("watch must not outlive a missing job");
        assert!(matches!(result, Err(DeployError::Compute(ref m)) if m.contains("not found")));
        assert_eq!(jobs.polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_is_terminal_failure() {
        let jobs = Arc::new(FakeJobs::new(vec![JobPhase::Running, JobPhase::Failed]));
        let err = model(jobs)
            .deploy(&project(), "production", &option(true))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeployError::JobTerminalFailure { ref name, .. } if name == "migrate-x7k2p9q0ab"
        ));
    }
}
