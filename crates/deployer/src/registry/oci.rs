//! OCI distribution (`/v2/`) registry client.
//!
//! Tags are listed through `tags/list` and grouped by the manifest digest
//! each one resolves to.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, LINK, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{ImageGroup, Registry};
use crate::error::{DeployError, Result};

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.docker.distribution.manifest.v2+json";

const DIGEST_HEADER: &str = "docker-content-digest";

/// Manifest lookups in flight at once.
const CONCURRENT_LOOKUPS: usize = 8;

#[derive(Debug, Clone)]
pub struct OciRegistry {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl OciRegistry {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("deployer/1.0"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let mut url = format!("{}/v2/{repository}/tags/list?n=1000", self.base_url);
        let mut tags = Vec::new();

        loop {
            let response = self.request(reqwest::Method::GET, &url).send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(DeployError::Registry(format!(
                    "listing tags of {repository}: {status} - {body}"
                )));
            }

            let next = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);

            let page: TagList = response.json().await?;
            tags.extend(page.tags.unwrap_or_default());

            match next {
                Some(path) if path.starts_with("http") => url = path,
                Some(path) => url = format!("{}{path}", self.base_url),
                None => break,
            }
        }

        Ok(tags)
    }

    async fn digest(&self, repository: &str, tag: &str) -> Result<String> {
        let url = format!("{}/v2/{repository}/manifests/{tag}", self.base_url);
        let response = self
            .request(reqwest::Method::HEAD, &url)
            .header(ACCEPT, MANIFEST_MEDIA_TYPES)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeployError::Registry(format!(
                "manifest {repository}:{tag}: {}",
                response.status()
            )));
        }

        response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .ok_or_else(|| {
                DeployError::Registry(format!("manifest {repository}:{tag} has no digest"))
            })
    }
}

/// Target of a `Link: <...>; rel="next"` header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params.contains("rel=\"next\"").then(|| {
            target
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    })
}

/// Group `(tag, digest)` pairs by digest, keeping first-seen order.
fn group_by_digest(pairs: Vec<(String, String)>) -> Vec<ImageGroup> {
    let mut groups: Vec<ImageGroup> = Vec::new();
    for (tag, digest) in pairs {
        match groups.iter_mut().find(|g| g.digest == digest) {
            Some(group) => group.tags.push(tag),
            None => groups.push(ImageGroup {
                digest,
                tags: vec![tag],
            }),
        }
    }
    groups
}

#[async_trait]
impl Registry for OciRegistry {
    #[instrument(skip(self))]
    async fn list_images(&self, repository: &str) -> Result<Vec<ImageGroup>> {
        let tags = self.list_tags(repository).await?;
        debug!(tags = tags.len(), "Listed registry tags");

        let pairs: Vec<(String, String)> = stream::iter(tags)
            .map(|tag| async move {
                let digest = self.digest(repository, &tag).await?;
                Ok::<_, DeployError>((tag, digest))
            })
            .buffered(CONCURRENT_LOOKUPS)
            .try_collect()
            .await?;

        Ok(group_by_digest(pairs))
    }
}
