//! Container image registry access.

pub mod oci;
pub mod resolver;

use async_trait::async_trait;

pub use oci::OciRegistry;
pub use resolver::{render_pattern, select_tag, ImageTagResolver, TagVars};

use crate::error::Result;

/// All tags that point at one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageGroup {
    pub digest: String,
    pub tags: Vec<String>,
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Image groups of a repository, in the registry's listing order.
    async fn list_images(&self, repository: &str) -> Result<Vec<ImageGroup>>;
}
