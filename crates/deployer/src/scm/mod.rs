//! Source-control host operations used by the pull-request workflow.
//!
//! File, branch and pull-request operations act on the manifest repository
//! the client was built for. Commit and branch listings take an `owner/name`
//! slug because they read application repositories.

pub mod github;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use github::GitHubClient;

use crate::error::Result;

/// Commits listed in a pull request body at most.
pub const MAX_LISTED_COMMITS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// Identifies a pull request across chat round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub head: String,
    pub body: String,
}

impl PullRequest {
    pub fn reference(&self) -> PullRequestRef {
        PullRequestRef {
            number: self.number,
            url: self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author: String,
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Contents of `path` on `branch`, or `None` if the file does not exist.
    async fn get_file(&self, branch: &str, path: &str) -> Result<Option<String>>;

    /// Point `branch` at the head of `from`, creating or resetting it.
    async fn create_branch(&self, branch: &str, from: &str) -> Result<()>;

    /// Commit all `files` to `branch` as one commit; returns its sha.
    async fn commit_files(&self, branch: &str, message: &str, files: &[FileChange])
        -> Result<String>;

    async fn delete_branch(&self, branch: &str) -> Result<()>;

    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<PullRequest>;

    async fn get_pull_request(&self, number: u64) -> Result<PullRequest>;

    async fn merge_pull_request(&self, number: u64) -> Result<()>;

    async fn close_pull_request(&self, number: u64) -> Result<()>;

    async fn request_review(&self, number: u64, reviewer: &str) -> Result<()>;

    /// Recent commits of `branch` in `repository`, newest first.
    async fn list_commits(&self, repository: &str, branch: &str) -> Result<Vec<CommitInfo>>;

    async fn list_branches(&self, repository: &str) -> Result<Vec<String>>;
}

/// Commits from `target` (inclusive) back to `current` (exclusive).
///
/// Revisions are matched by prefix since image tags carry short hashes.
pub fn commits_between<'a>(
    commits: &'a [CommitInfo],
    current: &str,
    target: &str,
) -> Vec<&'a CommitInfo> {
    let Some(start) = commits.iter().position(|c| c.sha.starts_with(target)) else {
        return Vec::new();
    };
    commits[start..]
        .iter()
        .take_while(|c| current.is_empty() || !c.sha.starts_with(current))
        .take(MAX_LISTED_COMMITS)
        .collect()
}

/// Render commits as pull request body lines.
pub fn format_commits(commits: &[&CommitInfo]) -> String {
    commits
        .iter()
        .map(|c| {
            let subject = c.message.lines().next().unwrap_or_default();
            let short = c.sha.get(..7).unwrap_or(&c.sha);
            format!("- {short} {subject} ({})", c.author)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
