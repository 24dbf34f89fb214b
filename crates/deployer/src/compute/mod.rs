//! Cluster and serverless compute targets.

pub mod cluster;
pub mod function;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;

pub use self::cluster::KubeCompute;
pub use self::function::HttpFunctionInvoker;

use crate::error::Result;

/// Reads the container images a running service is defined with.
#[async_trait]
pub trait ServiceInspector: Send + Sync {
    async fn container_images(&self, definition: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Running,
    Succeeded,
    Failed,
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn submit(&self, job: Job) -> Result<JobRef>;

    async fn status(&self, job: &JobRef) -> Result<JobPhase>;
}

/// Response of a synchronous function invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub status_code: u16,
    pub payload: String,
    /// Error reported by the function itself, as opposed to the transport.
    pub function_error: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function: &str, payload: &str) -> Result<Invocation>;
}
