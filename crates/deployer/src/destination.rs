//! Reads the revision currently running at a phase's destination.

use std::sync::Arc;

use tracing::instrument;

use crate::compute::ServiceInspector;
use crate::error::{DeployError, Result};
use crate::manifest;
use crate::project::Destination;
use crate::scm::SourceControl;

pub struct DestinationReader {
    scm: Arc<dyn SourceControl>,
    services: Arc<dyn ServiceInspector>,
    manifest_branch: String,
}

impl DestinationReader {
    pub fn new(
        scm: Arc<dyn SourceControl>,
        services: Arc<dyn ServiceInspector>,
        manifest_branch: &str,
    ) -> Self {
        Self {
            scm,
            services,
            manifest_branch: manifest_branch.to_string(),
        }
    }

    /// The running tag; empty when a manifest does not list the image yet.
    #[instrument(skip(self))]
    pub async fn current_revision(&self, destination: &Destination) -> Result<String> {
        match destination {
            Destination::Manifest { path, image } => {
                let raw = self
                    .scm
                    .get_file(&self.manifest_branch, path)
                    .await?
                    .unwrap_or_default();
                Ok(manifest::image_tag(&raw, image)?.unwrap_or_default())
            }
            Destination::ComputeService { definition, image } => {
                let images = self.services.container_images(definition).await?;
                let reference = images
                    .iter()
                    .find(|r| *r == image || r.starts_with(&format!("{image}:")))
                    .ok_or_else(|| DeployError::ImageNotFound {
                        image: image.clone(),
                        definition: definition.clone(),
                    })?;
                split_reference(reference)
            }
            Destination::Unsupported => Err(DeployError::UnsupportedDestination),
        }
    }

    /// Whether `tag` already runs at `destination`.
    ///
    /// Destinations that cannot be read never count as deployed.
    pub async fn is_deployed(&self, destination: &Destination, tag: &str) -> Result<bool> {
        match self.current_revision(destination).await {
            Ok(current) => Ok(current == tag),
            Err(DeployError::UnsupportedDestination) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Tag of an `image:tag` reference; anything but exactly two parts is invalid.
fn split_reference(reference: &str) -> Result<String> {
    let parts: Vec<&str> = reference.split(':').collect();
    match parts.as_slice() {
        [_, tag] => Ok((*tag).to_string()),
        _ => Err(DeployError::InvalidImageReference(reference.to_string())),
    }
}
