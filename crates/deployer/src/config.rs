//! Runtime configuration loaded from environment variables.

use std::time::Duration;

use crate::error::{DeployError, Result};

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_LOCKS_CONFIGMAP: &str = "deploylocks";
const DEFAULT_PROJECTS_FILE: &str = "/etc/deployer/projects.yaml";
const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_AUTO_DEPLOY_INTERVAL_SECS: u64 = 60;
const DEFAULT_JOB_POLL_INTERVAL_SECS: u64 = 20;
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TRIGGER_USER: &str = "deployer";

#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace holding the lock `ConfigMap` and deploy Jobs.
    pub namespace: String,
    pub locks_configmap: String,
    pub projects_file: String,

    /// Manifest repository as `owner/name` or its clone URL.
    pub manifest_repository: String,
    pub manifest_default_branch: String,
    pub github_token: Option<String>,
    pub github_api_url: String,

    pub registry_url: String,
    pub registry_token: Option<String>,

    pub function_endpoint: Option<String>,

    pub trigger_host: Option<String>,
    pub trigger_user: String,
    pub trigger_user_token: Option<String>,
    pub trigger_job_token: Option<String>,

    pub enable_auto_deploy: bool,
    pub auto_deploy_interval: Duration,
    pub job_poll_interval: Duration,

    pub port: u16,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            namespace: env_or("DEPLOYER_NAMESPACE", DEFAULT_NAMESPACE),
            locks_configmap: env_or("DEPLOYER_LOCKS_CONFIGMAP", DEFAULT_LOCKS_CONFIGMAP),
            projects_file: env_or("DEPLOYER_PROJECTS_FILE", DEFAULT_PROJECTS_FILE),

            manifest_repository: env_or("DEPLOYER_MANIFEST_REPOSITORY", ""),
            manifest_default_branch: env_or(
                "DEPLOYER_DEFAULT_BRANCH",
                crate::project::DEFAULT_BRANCH,
            ),
            github_token: env_opt("DEPLOYER_GITHUB_TOKEN"),
            github_api_url: env_or("DEPLOYER_GITHUB_API_URL", DEFAULT_GITHUB_API_URL),

            registry_url: env_or("DEPLOYER_REGISTRY_URL", ""),
            registry_token: env_opt("DEPLOYER_REGISTRY_TOKEN"),

            function_endpoint: env_opt("DEPLOYER_FUNCTION_ENDPOINT"),

            trigger_host: env_opt("DEPLOYER_TRIGGER_HOST"),
            trigger_user: env_or("DEPLOYER_TRIGGER_USER", DEFAULT_TRIGGER_USER),
            trigger_user_token: env_opt("DEPLOYER_TRIGGER_USER_TOKEN"),
            trigger_job_token: env_opt("DEPLOYER_TRIGGER_JOB_TOKEN"),

            enable_auto_deploy: env_opt("DEPLOYER_ENABLE_AUTO_DEPLOY")
                .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1"),
            auto_deploy_interval: Duration::from_secs(env_parse(
                "DEPLOYER_AUTO_DEPLOY_INTERVAL_SECS",
                DEFAULT_AUTO_DEPLOY_INTERVAL_SECS,
            )),
            job_poll_interval: Duration::from_secs(env_parse(
                "DEPLOYER_JOB_POLL_INTERVAL_SECS",
                DEFAULT_JOB_POLL_INTERVAL_SECS,
            )),

            port: env_parse("DEPLOYER_PORT", DEFAULT_PORT),
        }
    }

    /// Check the settings every adapter needs before wiring them up.
    pub fn validate(&self) -> Result<()> {
        if split_repository(&self.manifest_repository).is_none() {
            return Err(DeployError::Config(
                "DEPLOYER_MANIFEST_REPOSITORY must be owner/name".to_string(),
            ));
        }
        if self.github_token.is_none() {
            return Err(DeployError::Config(
                "DEPLOYER_GITHUB_TOKEN is not set".to_string(),
            ));
        }
        if self.registry_url.is_empty() {
            return Err(DeployError::Config(
                "DEPLOYER_REGISTRY_URL is not set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Split `owner/name`, or a clone URL such as
/// `https://github.com/owner/name.git`, into its parts.
pub fn split_repository(slug: &str) -> Option<(&str, &str)> {
    let slug = slug.trim_end_matches('/').trim_end_matches(".git");
    let slug = match slug.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, path)| path),
        None => slug,
    };
    slug.split_once('/')
        .filter(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'))
}
