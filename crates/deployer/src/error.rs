//! Error taxonomy for the deployment engine.

use thiserror::Error;

use crate::model::DeployOutput;

/// Errors raised by a [`crate::lock::LockStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored document changed since it was read
    #[error("lock document changed concurrently")]
    Conflict,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("the phase is already locked")]
    AlreadyLocked,

    #[error("the phase is already unlocked")]
    AlreadyUnlocked,

    #[error("user {0} is not allowed to unlock this project")]
    NotAllowedToUnlock(String),

    #[error("unable to {action} lock after {retries} retries")]
    LockConflictExhausted { action: &'static str, retries: usize },

    #[error("Deployment failed: locked by {user}")]
    Locked { user: String },

    #[error("user {0} is not allowed to do this")]
    Forbidden(String),

    #[error("unknown user {0}")]
    UnknownUser(String),

    #[error("project {0} not found")]
    ProjectNotFound(String),

    #[error("phase {phase} not found in project {project}")]
    PhaseNotFound { project: String, phase: String },

    #[error("unknown deploy kind {0}")]
    UnknownKind(String),

    #[error("ticket {0} has already been handled")]
    TicketClosed(String),

    #[error("ticket {0} was never issued")]
    UnknownTicket(String),

    #[error("NotFound specified image tag")]
    ImageTagNotFound,

    #[error("invalid tag template: {0}")]
    TemplateError(String),

    #[error("Invalid image name: {0}")]
    InvalidImageReference(String),

    #[error("NotFound specified image {image} in {definition}")]
    ImageNotFound { image: String, definition: String },

    #[error("destination is not supported")]
    UnsupportedDestination,

    #[error("failed to submit job: {0}")]
    JobSubmissionFailed(String),

    #[error("job {namespace}/{name} failed")]
    JobTerminalFailure { namespace: String, name: String },

    #[error("function invocation failed: {payload}")]
    FunctionInvocationFailed { payload: String },

    #[error("trigger request failed: responded {status}")]
    TriggerFailed { status: u16 },

    #[error("deployment reported failure: {0}")]
    DeployFailed(String),

    #[error("Failed to deploy while deploying {step}({index}/{total}): {source}")]
    StepFailed {
        step: String,
        index: usize,
        total: usize,
        #[source]
        source: Box<DeployError>,
        partial: DeployOutput,
    },

    #[error("lock store error: {0}")]
    Store(#[from] StoreError),

    #[error("source control error: {0}")]
    Scm(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("compute error: {0}")]
    Compute(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = DeployError> = std::result::Result<T, E>;
