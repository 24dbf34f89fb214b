//! Chat-driven deployment coordination.
//!
//! This crate provides:
//! - Per-(project, phase) deploy locks with optimistic concurrency
//! - Image tag resolution from registry listings
//! - Deploy models: GitOps pull requests, cluster Jobs, function
//!   invocation, CI triggers, and ordered combinations of those
//! - The request/approve/reject workflow behind the chat integration
//! - A scheduler that rolls auto-deploy phases forward

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod autodeploy;
pub mod clock;
pub mod compute;
pub mod config;
pub mod destination;
pub mod dispatch;
pub mod error;
pub mod lock;
pub mod manifest;
pub mod model;
pub mod project;
pub mod registry;
pub mod scm;
pub mod server;
pub mod user;
pub mod workflow;

#[cfg(test)]
mod testing;

// Re-export main types
pub use autodeploy::{AutoDeployScheduler, TickOutcome};
pub use config::Config;
pub use dispatch::DeployDispatcher;
pub use error::{DeployError, Result, StoreError};
pub use lock::{LockCoordinator, LockState};
pub use model::{DeployKind, DeployOption, DeployOutput, DeployStatus};
pub use project::{CatalogDocument, Project, ProjectCatalog};
pub use user::{Role, User, UserDirectory};
pub use workflow::{DeployRequest, DeployTicket, Outcome, RequestWorkflow};
