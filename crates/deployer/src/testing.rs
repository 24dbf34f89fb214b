//! In-memory stand-ins for the external systems, shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use notify::{ChannelError, Notifier, NotifyChannel, NotifyEvent};

use crate::compute::{JobPhase, JobRef, JobRunner, ServiceInspector};
use crate::error::{DeployError, Result};
use crate::model::{DeployModel, DeployOption, DeployOutput, SuffixGenerator};
use crate::project::Project;
use crate::registry::{ImageGroup, Registry};
use crate::scm::{CommitInfo, FileChange, NewPullRequest, PullRequest, SourceControl};

#[derive(Debug, Default)]
pub struct FakeRegistry {
    groups: Vec<ImageGroup>,
}

impl FakeRegistry {
    pub fn new(groups: Vec<ImageGroup>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn list_images(&self, _repository: &str) -> Result<Vec<ImageGroup>> {
        Ok(self.groups.clone())
    }
}

#[derive(Debug, Clone)]
struct StoredPullRequest {
    pull_request: PullRequest,
    base: String,
}

#[derive(Debug, Default)]
struct ScmState {
    files: HashMap<(String, String), String>,
    branches: Vec<String>,
    commits: Vec<(String, String, Vec<FileChange>)>,
    pull_requests: Vec<StoredPullRequest>,
    merged: Vec<u64>,
    closed: Vec<u64>,
    deleted: Vec<String>,
    reviews: Vec<(u64, String)>,
    repo_commits: HashMap<String, Vec<CommitInfo>>,
    repo_branches: HashMap<String, Vec<String>>,
}

impl ScmState {
    fn copy_branch(&mut self, from: &str, to: &str) {
        let copied: Vec<_> = self
            .files
            .iter()
            .filter(|((branch, _), _)| branch == from)
            .map(|((_, path), content)| ((to.to_string(), path.clone()), content.clone()))
            .collect();
        self.files.extend(copied);
    }
}

/// Source control host backed by a map of (branch, path) to contents.
///
/// Merging copies the head branch's files onto the base branch.
#[derive(Debug, Default)]
pub struct FakeScm {
    state: Mutex<ScmState>,
}

impl FakeScm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_file(&self, branch: &str, path: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert((branch.to_string(), path.to_string()), content.to_string());
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&(branch.to_string(), path.to_string()))
            .cloned()
    }

    pub fn set_commits(&self, repository: &str, commits: Vec<CommitInfo>) {
        self.state
            .lock()
            .unwrap()
            .repo_commits
            .insert(repository.to_string(), commits);
    }

    pub fn set_branches(&self, repository: &str, branches: Vec<String>) {
        self.state
            .lock()
            .unwrap()
            .repo_branches
            .insert(repository.to_string(), branches);
    }

    /// Branches created through the client.
    pub fn branches(&self) -> Vec<String> {
        self.state.lock().unwrap().branches.clone()
    }

    /// (branch, message, files) per commit.
    pub fn commits(&self) -> Vec<(String, String, Vec<FileChange>)> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.state
            .lock()
            .unwrap()
            .pull_requests
            .iter()
            .map(|stored| stored.pull_request.clone())
            .collect()
    }

    pub fn merged(&self) -> Vec<u64> {
        self.state.lock().unwrap().merged.clone()
    }

    pub fn closed(&self) -> Vec<u64> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn reviews(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().reviews.clone()
    }
}

fn missing_pull_request(number: u64) -> DeployError {
    DeployError::Scm(format!("pull request {number} not found"))
}

#[async_trait]
impl SourceControl for FakeScm {
    async fn get_file(&self, branch: &str, path: &str) -> Result<Option<String>> {
        Ok(self.file(branch, path))
    }

    async fn create_branch(&self, branch: &str, from: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.copy_branch(from, branch);
        if !state.branches.iter().any(|b| b == branch) {
            state.branches.push(branch.to_string());
        }
        Ok(())
    }

    async fn commit_files(
        &self,
        branch: &str,
        message: &str,
        files: &[FileChange],
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        for file in files {
            state
                .files
                .insert((branch.to_string(), file.path.clone()), file.content.clone());
        }
        state
            .commits
            .push((branch.to_string(), message.to_string(), files.to_vec()));
        Ok(format!("{:040x}", state.commits.len()))
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.files.retain(|(b, _), _| b != branch);
        state.deleted.push(branch.to_string());
        Ok(())
    }

    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<PullRequest> {
        let mut state = self.state.lock().unwrap();
        let number = state.pull_requests.len() as u64 + 1;
        let pull_request = PullRequest {
            number,
            url: format!("https://github.com/acme/manifests/pull/{number}"),
            head: request.head.clone(),
            body: request.body.clone(),
        };
        state.pull_requests.push(StoredPullRequest {
            pull_request: pull_request.clone(),
            base: request.base.clone(),
        });
        Ok(pull_request)
    }

    async fn get_pull_request(&self, number: u64) -> Result<PullRequest> {
        self.state
            .lock()
            .unwrap()
            .pull_requests
            .iter()
            .find(|stored| stored.pull_request.number == number)
            .map(|stored| stored.pull_request.clone())
            .ok_or_else(|| missing_pull_request(number))
    }

    async fn merge_pull_request(&self, number: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .pull_requests
            .iter()
            .find(|stored| stored.pull_request.number == number)
            .cloned()
            .ok_or_else(|| missing_pull_request(number))?;
        state.copy_branch(&stored.pull_request.head, &stored.base);
        state.merged.push(number);
        Ok(())
    }

    async fn close_pull_request(&self, number: u64) -> Result<()> {
        self.state.lock().unwrap().closed.push(number);
        Ok(())
    }

    async fn request_review(&self, number: u64, reviewer: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .reviews
            .push((number, reviewer.to_string()));
        Ok(())
    }

    async fn list_commits(&self, repository: &str, _branch: &str) -> Result<Vec<CommitInfo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .repo_commits
            .get(repository)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_branches(&self, repository: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .repo_branches
            .get(repository)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct FakeServices {
    images: HashMap<String, Vec<String>>,
}

impl FakeServices {
    pub fn with_images(definition: &str, images: Vec<String>) -> Self {
        Self {
            images: HashMap::from([(definition.to_string(), images)]),
        }
    }
}

#[async_trait]
impl ServiceInspector for FakeServices {
    async fn container_images(&self, definition: &str) -> Result<Vec<String>> {
        self.images
            .get(definition)
            .cloned()
            .ok_or_else(|| DeployError::Compute(format!("service {definition} not found")))
    }
}

/// Job runner replaying scripted statuses; the last one repeats.
#[derive(Debug, Default)]
pub struct FakeJobs {
    statuses: Vec<JobPhase>,
    /// Every status read fails, as for a Job deleted after submission
    vanished: bool,
    submitted: Mutex<Vec<Job>>,
    polls: AtomicUsize,
}

impl FakeJobs {
    pub fn new(statuses: Vec<JobPhase>) -> Self {
        Self {
            statuses,
            ..Self::default()
        }
    }

    pub fn vanished() -> Self {
        Self {
            vanished: true,
            ..Self::default()
        }
    }

    pub fn submitted(&self) -> Vec<Job> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for FakeJobs {
    async fn submit(&self, job: Job) -> Result<JobRef> {
        let job_ref = JobRef {
            namespace: job
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            name: job.metadata.name.clone().unwrap_or_default(),
        };
        self.submitted.lock().unwrap().push(job);
        Ok(job_ref)
    }

    async fn status(&self, job: &JobRef) -> Result<JobPhase> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        if self.vanished {
            return Err(DeployError::Compute(format!(
                "job {}/{} not found",
                job.namespace, job.name
            )));
        }
        Ok(self
            .statuses
            .get(poll)
            .or_else(|| self.statuses.last())
            .copied()
            .unwrap_or(JobPhase::Running))
    }
}

pub struct FixedSuffix(pub String);

impl SuffixGenerator for FixedSuffix {
    fn suffix(&self) -> String {
        self.0.clone()
    }
}

/// Deploy model that records its calls and answers from a script.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    /// Calls that fail before the model starts succeeding
    failures: usize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn err() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Tag passed in each call; empty when none was pre-resolved.
    pub fn seen_tags(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeployModel for ScriptedModel {
    async fn deploy(
        &self,
        project: &Project,
        phase: &str,
        option: &DeployOption,
    ) -> Result<DeployOutput> {
        let call = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(option.tag.clone().unwrap_or_default());
            seen.len()
        };
        if call <= self.failures {
            return Err(DeployError::DeployFailed(format!(
                "{} {phase} scripted failure",
                project.id
            )));
        }
        Ok(DeployOutput::success(format!("{} {phase} done", project.id)))
    }
}

#[derive(Debug, Default)]
pub struct RecordingChannel {
    events: Mutex<Vec<NotifyEvent>>,
}

impl RecordingChannel {
    pub fn events(&self) -> Vec<NotifyEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotifyChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn send(&self, event: &NotifyEvent) -> std::result::Result<(), ChannelError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A notifier whose only channel records every event it is sent.
pub fn recording_notifier() -> (Notifier, Arc<RecordingChannel>) {
    let channel = Arc::new(RecordingChannel::default());
    let notifier = Notifier::with_channels(vec![channel.clone() as Arc<dyn NotifyChannel>]);
    (notifier, channel)
}
