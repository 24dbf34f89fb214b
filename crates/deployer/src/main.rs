//! Deployer service binary.
//!
//! Serves the chat-facing HTTP API and, when enabled, the auto deploy
//! scheduler.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use deployer::clock::SystemClock;
use deployer::compute::{HttpFunctionInvoker, KubeCompute};
use deployer::config::split_repository;
use deployer::destination::DestinationReader;
use deployer::lock::ConfigMapLockStore;
use deployer::model::{
    GitOpsModel, GitOpsPreparer, InvokeModel, JobModel, ModelTable, RandomSuffix, TriggerConfig,
    TriggerModel,
};
use deployer::registry::{ImageTagResolver, OciRegistry};
use deployer::scm::GitHubClient;
use deployer::server::{build_router, AppState};
use deployer::{
    AutoDeployScheduler, CatalogDocument, Config, DeployDispatcher, DeployKind, LockCoordinator,
    ProjectCatalog, RequestWorkflow, UserDirectory,
};
use notify::Notifier;

/// Deployer - chat-driven deployment coordination.
#[derive(Parser)]
#[command(name = "deployer")]
#[command(about = "Chat-driven deployment coordination service")]
#[command(version)]
struct Cli {
    /// Project and user catalog (YAML)
    #[arg(long, env = "DEPLOYER_PROJECTS_FILE")]
    projects_file: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// HTTP listen port
    #[arg(long, env = "DEPLOYER_PORT")]
    port: Option<u16>,

    /// Run the auto deploy scheduler
    #[arg(long)]
    auto_deploy: bool,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("deployer=info,notify=info"))?;
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let mut config = Config::from_env();
    if let Some(path) = cli.projects_file {
        config.projects_file = path;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.enable_auto_deploy |= cli.auto_deploy;
    config.validate().context("Invalid configuration")?;

    info!(projects_file = %config.projects_file, "Starting deployer");
    let doc = CatalogDocument::load(&config.projects_file).context("Failed to load catalog")?;
    info!(
        projects = doc.projects.len(),
        users = doc.users.len(),
        "Catalog loaded"
    );
    let catalog = Arc::new(ProjectCatalog::new(doc.projects));
    let users = Arc::new(UserDirectory::new(doc.users));

    let kube_client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!(namespace = %config.namespace, "Connected to Kubernetes");

    let (owner, repo) = split_repository(&config.manifest_repository)
        .context("DEPLOYER_MANIFEST_REPOSITORY must name owner/repo")?;
    let github_token = config.github_token.as_deref().unwrap_or_default();
    let scm = Arc::new(GitHubClient::new(&config.github_api_url, github_token, owner, repo)?);
    let registry = Arc::new(OciRegistry::new(
        &config.registry_url,
        config.registry_token.clone(),
    )?);
    let compute = Arc::new(KubeCompute::new(kube_client.clone(), &config.namespace));
    let clock = Arc::new(SystemClock);
    let branch = config.manifest_default_branch.as_str();

    let resolver = Arc::new(ImageTagResolver::new(registry));
    let destinations = Arc::new(DestinationReader::new(scm.clone(), compute.clone(), branch));
    let preparer = Arc::new(GitOpsPreparer::new(
        scm.clone(),
        resolver.clone(),
        destinations.clone(),
        clock.clone(),
        branch,
    ));
    let locks = Arc::new(LockCoordinator::new(
        Arc::new(ConfigMapLockStore::new(
            kube_client,
            &config.namespace,
            &config.locks_configmap,
        )),
        clock.clone(),
    ));

    let mut models = ModelTable::new()
        .with(
            DeployKind::GitOps,
            Arc::new(GitOpsModel::new(preparer.clone(), scm.clone())),
        )
        .with(
            DeployKind::Job,
            Arc::new(JobModel::new(
                scm.clone(),
                resolver.clone(),
                destinations.clone(),
                compute,
                Arc::new(RandomSuffix),
                branch,
                config.job_poll_interval,
            )),
        );
    match &config.function_endpoint {
        Some(endpoint) => {
            models = models.with(
                DeployKind::Invoke,
                Arc::new(InvokeModel::new(
                    resolver.clone(),
                    destinations.clone(),
                    Arc::new(HttpFunctionInvoker::new(endpoint)),
                )),
            );
        }
        None => warn!("DEPLOYER_FUNCTION_ENDPOINT not set - invoke deployments disabled"),
    }
    match &config.trigger_host {
        Some(host) => {
            models = models.with(
                DeployKind::Trigger,
                Arc::new(TriggerModel::new(TriggerConfig {
                    base_url: host.clone(),
                    user: config.trigger_user.clone(),
                    user_token: config.trigger_user_token.clone().unwrap_or_default(),
                    job_token: config.trigger_job_token.clone().unwrap_or_default(),
                })),
            );
        }
        None => warn!("DEPLOYER_TRIGGER_HOST not set - trigger deployments disabled"),
    }

    let dispatcher = Arc::new(DeployDispatcher::new(catalog, resolver.clone(), models));
    let notifier = Arc::new(Notifier::from_env());

    if config.enable_auto_deploy {
        let scheduler = Arc::new(AutoDeployScheduler::new(
            dispatcher.clone(),
            resolver,
            destinations,
            locks.clone(),
            notifier.clone(),
            clock.clone(),
            config.auto_deploy_interval,
        ));
        let handles = scheduler.spawn();
        info!(tasks = handles.len(), "Auto deploy enabled");
    }

    let workflow = Arc::new(RequestWorkflow::new(
        dispatcher, preparer, scm, locks, users, notifier, clock,
    ));
    let app = build_router(AppState {
        workflow,
        projects_file: config.projects_file.as_str().into(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!(port = config.port, "Deployer listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
