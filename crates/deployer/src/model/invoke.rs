//! Synchronous serverless function invocation.

use std::sync::Arc;

use async_trait::async_trait;
use handlebars::Handlebars;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{resolve_tag, DeployModel, DeployOption, DeployOutput};
use crate::compute::FunctionInvoker;
use crate::destination::DestinationReader;
use crate::error::{DeployError, Result};
use crate::project::Project;
use crate::registry::ImageTagResolver;

const DEFAULT_PAYLOAD: &str = r#"{"tag":"{{Tag}}"}"#;

pub struct InvokeModel {
    resolver: Arc<ImageTagResolver>,
    destinations: Arc<DestinationReader>,
    invoker: Arc<dyn FunctionInvoker>,
}

impl InvokeModel {
    pub fn new(
        resolver: Arc<ImageTagResolver>,
        destinations: Arc<DestinationReader>,
        invoker: Arc<dyn FunctionInvoker>,
    ) -> Self {
        Self {
            resolver,
            destinations,
            invoker,
        }
    }
}

/// Render a payload template with `{{Tag}}` and `{{Phase}}`.
pub fn render_payload(template: &str, tag: &str, phase: &str) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .render_template(template, &json!({ "Tag": tag, "Phase": phase }))
        .map_err(|e| DeployError::TemplateError(e.to_string()))
}

#[async_trait]
impl DeployModel for InvokeModel {
    #[instrument(skip(self, project, option), fields(project = %project.id))]
    async fn deploy(
        &self,
        project: &Project,
        phase: &str,
        option: &DeployOption,
    ) -> Result<DeployOutput> {
        let ph = project.phase(phase)?;
        let function = project
            .function_name
            .as_deref()
            .ok_or_else(|| DeployError::Config(format!("project {} has no function", project.id)))?;

        let tag = resolve_tag(&self.resolver, project, phase, option).await?;
        if self.destinations.is_deployed(ph.destination(), &tag).await? {
            return Ok(DeployOutput::already(format!("{function} already runs {tag}")));
        }

        let payload = render_payload(ph.payload.as_deref().unwrap_or(DEFAULT_PAYLOAD), &tag, phase)?;
        let invocation = self.invoker.invoke(function, &payload).await?;

        if let Some(error) = invocation.function_error {
            warn!(function, error = %error, "Function reported an error");
            return Ok(DeployOutput::fail(invocation.payload));
        }
        if !(200..300).contains(&invocation.status_code) {
            return Err(DeployError::FunctionInvocationFailed {
                payload: invocation.payload,
            });
        }

        info!(function, tag = %tag, "Function invoked");
        Ok(DeployOutput::success(invocation.payload))
    }
}
