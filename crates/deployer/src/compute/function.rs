//! Synchronous function invocation over HTTP.
//!
//! The endpoint receives `POST {endpoint}/functions/{name}/invocations` with
//! the rendered payload. A function-level failure is signalled through the
//! `X-Function-Error` response header, as serverless gateways commonly do.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use tracing::{debug, instrument};

use super::{FunctionInvoker, Invocation};
use crate::error::Result;

const FUNCTION_ERROR_HEADER: &str = "x-function-error";

#[derive(Debug, Clone)]
pub struct HttpFunctionInvoker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpFunctionInvoker {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl FunctionInvoker for HttpFunctionInvoker {
    #[instrument(skip(self, payload))]
    async fn invoke(&self, function: &str, payload: &str) -> Result<Invocation> {
        let url = format!("{}/functions/{function}/invocations", self.endpoint);
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload.to_string())
            .send()
            .await?;

        let status_code = response.status().as_u16();
        let function_error = response
            .headers()
            .get(FUNCTION_ERROR_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(ToString::to_string);
        let payload = response.text().await?;

        debug!(status_code, has_error = function_error.is_some(), "Function invoked");
        Ok(Invocation {
            status_code,
            payload,
            function_error,
        })
    }
}
