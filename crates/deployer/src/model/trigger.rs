//! Parameterised build trigger on an external CI server.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{info, instrument, warn};

use super::{DeployModel, DeployOption, DeployOutput};
use crate::error::{DeployError, Result};
use crate::project::Project;

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Base URL of the CI server, e.g. `https://ci.example.com`.
    pub base_url: String,
    pub user: String,
    pub user_token: String,
    pub job_token: String,
}

pub struct TriggerModel {
    client: reqwest::Client,
    config: TriggerConfig,
}

impl TriggerModel {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn job_url(&self, job: &str) -> String {
        format!(
            "{}/job/{job}/buildWithParameters",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl DeployModel for TriggerModel {
    #[instrument(skip(self, project, option), fields(project = %project.id, branch = %option.branch))]
    async fn deploy(
        &self,
        project: &Project,
        phase: &str,
        option: &DeployOption,
    ) -> Result<DeployOutput> {
        let job = project.trigger_job.as_deref().unwrap_or(&project.id);

        let response = self
            .client
            .post(self.job_url(job))
            .basic_auth(&self.config.user, Some(&self.config.user_token))
            .query(&[
                ("token", self.config.job_token.as_str()),
                ("cause", "deployer"),
                ("ENV", phase),
                ("BRANCH", option.branch.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            warn!(job, status = %status, "Trigger request rejected");
            return Err(DeployError::TriggerFailed {
                status: status.as_u16(),
            });
        }

        info!(job, "Triggered build");
        Ok(DeployOutput::success(format!(
            "Execute {}/job/{job}/ selected branch: {}",
            self.config.base_url.trim_end_matches('/'),
            option.branch
        )))
    }
}
