//! GitHub REST API implementation of [`SourceControl`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use super::{CommitInfo, FileChange, NewPullRequest, PullRequest, SourceControl};
use crate::error::{DeployError, Result};

const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";

#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
    owner: String,
    repo: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    tree: GitObject,
}

#[derive(Debug, Serialize)]
struct TreeEntry<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
    #[serde(default)]
    body: Option<String>,
    head: PullHead,
}

#[derive(Debug, Deserialize)]
struct PullHead {
    #[serde(rename = "ref")]
    name: String,
}

impl From<PullResponse> for PullRequest {
    fn from(pr: PullResponse) -> Self {
        Self {
            number: pr.number,
            url: pr.html_url,
            head: pr.head.name,
            body: pr.body.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
    #[serde(default)]
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    name: String,
}

impl GitHubClient {
    /// Create a client for the `owner/repo` manifest repository.
    pub fn new(api_url: &str, token: &str, owner: &str, repo: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("deployer/1.0"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{path}", self.api_url, self.owner, self.repo)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.token)
    }

    async fn check(response: Response, context: &str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(DeployError::Scm(format!("{context}: {status} - {body}")))
    }

    async fn json<T: DeserializeOwned>(response: Response, context: &str) -> Result<T> {
        Ok(Self::check(response, context).await?.json().await?)
    }

    async fn branch_head(&self, branch: &str) -> Result<String> {
        let response = self
            .request(Method::GET, &self.repo_url(&format!("/git/ref/heads/{branch}")))
            .send()
            .await?;
        let git_ref: GitRef = Self::json(response, "reading branch head").await?;
        Ok(git_ref.object.sha)
    }

    async fn move_branch(&self, branch: &str, sha: &str, force: bool) -> Result<()> {
        let response = self
            .request(Method::PATCH, &self.repo_url(&format!("/git/refs/heads/{branch}")))
            .json(&json!({ "sha": sha, "force": force }))
            .send()
            .await?;
        Self::check(response, "updating branch").await?;
        Ok(())
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    async fn get_file(&self, branch: &str, path: &str) -> Result<Option<String>> {
        let response = self
            .request(Method::GET, &self.repo_url(&format!("/contents/{path}")))
            .query(&[("ref", branch)])
            .header(ACCEPT, RAW_MEDIA_TYPE)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response, "reading file").await?;
        Ok(Some(response.text().await?))
    }

    #[instrument(skip(self))]
    async fn create_branch(&self, branch: &str, from: &str) -> Result<()> {
        let sha = self.branch_head(from).await?;
        let response = self
            .request(Method::POST, &self.repo_url("/git/refs"))
            .json(&json!({ "ref": format!("refs/heads/{branch}"), "sha": sha }))
            .send()
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            debug!(branch, "Branch exists, resetting to base");
            return self.move_branch(branch, &sha, true).await;
        }
        Self::check(response, "creating branch").await?;
        info!(branch, from, "Created branch");
        Ok(())
    }

    #[instrument(skip(self, files), fields(files = files.len()))]
    async fn commit_files(
        &self,
        branch: &str,
        message: &str,
        files: &[FileChange],
    ) -> Result<String> {
        let parent = self.branch_head(branch).await?;

        let response = self
            .request(Method::GET, &self.repo_url(&format!("/git/commits/{parent}")))
            .send()
            .await?;
        let parent_commit: GitCommit = Self::json(response, "reading parent commit").await?;

        let tree: Vec<TreeEntry<'_>> = files
            .iter()
            .map(|f| TreeEntry {
                path: &f.path,
                mode: "100644",
                kind: "blob",
                content: &f.content,
            })
            .collect();
        let response = self
            .request(Method::POST, &self.repo_url("/git/trees"))
            .json(&json!({ "base_tree": parent_commit.tree.sha, "tree": tree }))
            .send()
            .await?;
        let new_tree: GitObject = Self::json(response, "creating tree").await?;

        let response = self
            .request(Method::POST, &self.repo_url("/git/commits"))
            .json(&json!({ "message": message, "tree": new_tree.sha, "parents": [parent] }))
            .send()
            .await?;
        let commit: GitObject = Self::json(response, "creating commit").await?;

        self.move_branch(branch, &commit.sha, false).await?;
        info!(branch, sha = %commit.sha, "Committed files");
        Ok(commit.sha)
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &self.repo_url(&format!("/git/refs/heads/{branch}")))
            .send()
            .await?;
        Self::check(response, "deleting branch").await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(head = %request.head))]
    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<PullRequest> {
        let response = self
            .request(Method::POST, &self.repo_url("/pulls"))
            .json(&json!({
                "title": request.title,
                "body": request.body,
                "head": request.head,
                "base": request.base,
            }))
            .send()
            .await?;
        let pr: PullResponse = Self::json(response, "creating pull request").await?;
        info!(number = pr.number, url = %pr.html_url, "Created pull request");
        Ok(pr.into())
    }

    async fn get_pull_request(&self, number: u64) -> Result<PullRequest> {
        let response = self
            .request(Method::GET, &self.repo_url(&format!("/pulls/{number}")))
            .send()
            .await?;
        let pr: PullResponse = Self::json(response, "reading pull request").await?;
        Ok(pr.into())
    }

    #[instrument(skip(self))]
    async fn merge_pull_request(&self, number: u64) -> Result<()> {
        let response = self
            .request(Method::PUT, &self.repo_url(&format!("/pulls/{number}/merge")))
            .json(&json!({ "merge_method": "merge" }))
            .send()
            .await?;
        Self::check(response, "merging pull request").await?;
        info!(number, "Merged pull request");
        Ok(())
    }

    async fn close_pull_request(&self, number: u64) -> Result<()> {
        let response = self
            .request(Method::PATCH, &self.repo_url(&format!("/pulls/{number}")))
            .json(&json!({ "state": "closed" }))
            .send()
            .await?;
        Self::check(response, "closing pull request").await?;
        Ok(())
    }

    async fn request_review(&self, number: u64, reviewer: &str) -> Result<()> {
        let response = self
            .request(
                Method::POST,
                &self.repo_url(&format!("/pulls/{number}/requested_reviewers")),
            )
            .json(&json!({ "reviewers": [reviewer] }))
            .send()
            .await?;
        Self::check(response, "requesting review").await?;
        Ok(())
    }

    async fn list_commits(&self, repository: &str, branch: &str) -> Result<Vec<CommitInfo>> {
        let url = format!("{}/repos/{repository}/commits", self.api_url);
        let response = self
            .request(Method::GET, &url)
            .query(&[("sha", branch), ("per_page", "100")])
            .send()
            .await?;
        let commits: Vec<CommitResponse> = Self::json(response, "listing commits").await?;
        Ok(commits
            .into_iter()
            .map(|c| CommitInfo {
                sha: c.sha,
                message: c.commit.message,
                author: c.commit.author.map(|a| a.name).unwrap_or_default(),
            })
            .collect())
    }

    async fn list_branches(&self, repository: &str) -> Result<Vec<String>> {
        let url = format!("{}/repos/{repository}/branches", self.api_url);
        let response = self
            .request(Method::GET, &url)
            .query(&[("per_page", "100")])
            .send()
            .await?;
        let branches: Vec<BranchResponse> = Self::json(response, "listing branches").await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }
}
