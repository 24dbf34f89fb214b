//! Chat-facing deployment workflow: request, approve, reject, and locks.
//!
//! Synchronous checks (role, lock gate, known project and phase) fail the
//! call directly. Everything slower runs on a spawned task that reports
//! exactly one terminal [`Outcome`] through the notifier and its join
//! handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use notify::{Notifier, NotifyEvent};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::dispatch::DeployDispatcher;
use crate::error::{DeployError, Result};
use crate::lock::{render_locks, LockCoordinator, LockState};
use crate::model::{DeployOption, DeployOutput, DeployStatus, GitOpsPreparer, PrepareOutcome};
use crate::project::{CatalogDocument, Phase, Project};
use crate::scm::{PullRequestRef, SourceControl};
use crate::user::{Role, User, UserDirectory};

/// Characters of a merged pull request body echoed back to chat.
pub const MAX_BODY_CHARS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    Requested,
    Approved,
    Rejected,
}

/// A deployment awaiting a decision. Chat buttons carry only its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTicket {
    pub id: String,
    pub project: String,
    pub phase: String,
    pub branch: String,
    pub requester: String,
    pub channel: String,
    #[serde(default)]
    pub pull_request: Option<PullRequestRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Project id or alias
    pub project: String,
    pub phase: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub user: String,
    pub channel: String,
}

/// Terminal result of a workflow task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    AwaitingApproval(DeployTicket),
    AlreadyDeployed,
    Merged { url: String },
    Deployed(DeployOutput),
    Closed,
    Failed(String),
}

/// Immediate acknowledgement plus the background task's result.
pub struct Pending {
    pub ack: String,
    pub task: JoinHandle<Outcome>,
}

#[derive(Debug)]
struct IssuedTicket {
    ticket: DeployTicket,
    state: WorkflowState,
}

type TicketBook = Arc<Mutex<HashMap<String, IssuedTicket>>>;

pub struct RequestWorkflow {
    dispatcher: Arc<DeployDispatcher>,
    preparer: Arc<GitOpsPreparer>,
    scm: Arc<dyn SourceControl>,
    locks: Arc<LockCoordinator>,
    users: Arc<UserDirectory>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    tickets: TicketBook,
}

impl RequestWorkflow {
    pub fn new(
        dispatcher: Arc<DeployDispatcher>,
        preparer: Arc<GitOpsPreparer>,
        scm: Arc<dyn SourceControl>,
        locks: Arc<LockCoordinator>,
        users: Arc<UserDirectory>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dispatcher,
            preparer,
            scm,
            locks,
            users,
            notifier,
            clock,
            tickets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve a chat-supplied project name and phase.
    fn locate(&self, project: &str, phase: &str) -> Result<(Project, String)> {
        let project = self
            .dispatcher
            .catalog()
            .find_by_alias(project)
            .ok_or_else(|| DeployError::ProjectNotFound(project.to_string()))?;
        let phase = Phase::normalize_name(phase);
        project.phase(&phase)?;
        Ok((project, phase))
    }

    /// Fail if the phase is locked by anyone but `user`.
    async fn check_lock(&self, project: &str, phase: &str, user: &User) -> Result<()> {
        let locks = self.locks.fetch_locks(Some(project), Some(phase)).await?;
        let holder = locks
            .get(project)
            .and_then(|phases| phases.get(phase))
            .and_then(LockState::holder);
        match holder {
            Some(holder) if holder != user.display_name => Err(DeployError::Locked {
                user: holder.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Where a ticket stands; ids never issued are `Idle`.
    pub fn ticket_state(&self, id: &str) -> WorkflowState {
        self.tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map_or(WorkflowState::Idle, |issued| issued.state)
    }

    /// The issued ticket behind `id`, provided it still awaits a decision.
    fn pending_ticket(&self, id: &str) -> Result<DeployTicket> {
        let tickets = self.tickets.lock().unwrap_or_else(PoisonError::into_inner);
        match tickets.get(id) {
            Some(issued) if issued.state == WorkflowState::Requested => Ok(issued.ticket.clone()),
            Some(issued) => {
                warn!(ticket = %id, state = ?issued.state, "Ticket already handled");
                Err(DeployError::TicketClosed(id.to_string()))
            }
            None => Err(DeployError::UnknownTicket(id.to_string())),
        }
    }

    /// Move a ticket out of `Requested`; it cannot move again.
    fn close_ticket(&self, id: &str, to: WorkflowState) -> Result<DeployTicket> {
        let mut tickets = self.tickets.lock().unwrap_or_else(PoisonError::into_inner);
        let issued = tickets
            .get_mut(id)
            .ok_or_else(|| DeployError::UnknownTicket(id.to_string()))?;
        if issued.state != WorkflowState::Requested {
            return Err(DeployError::TicketClosed(id.to_string()));
        }
        issued.state = to;
        Ok(issued.ticket.clone())
    }

    /// Branches offered when the requester picks what to deploy.
    pub async fn branches(&self, project: &str) -> Result<Vec<String>> {
        let project = self
            .dispatcher
            .catalog()
            .find_by_alias(project)
            .ok_or_else(|| DeployError::ProjectNotFound(project.to_string()))?;
        if project.disable_branch_deploy || project.repository.is_empty() {
            return Ok(vec![project.default_branch().to_string()]);
        }
        self.scm.list_branches(&project.repository).await
    }

    #[instrument(skip(self), fields(project = %request.project, phase = %request.phase))]
    pub async fn request(&self, request: DeployRequest) -> Result<Pending> {
        let user = self.users.authorize(&request.user, Role::Developer)?;
        let (project, phase) = self.locate(&request.project, &request.phase)?;
        self.check_lock(&project.id, &phase, &user).await?;

        let branch = project.effective_branch(request.branch.as_deref());
        let warning = (phase == "production" && branch != project.default_branch()).then(|| {
            format!(
                "{branch} is not the default branch ({})",
                project.default_branch()
            )
        });
        let kind = self.dispatcher.kind_for(&project, &phase)?;

        let mut ticket = DeployTicket {
            id: Uuid::new_v4().to_string(),
            project: project.id.clone(),
            phase: phase.clone(),
            branch: branch.clone(),
            requester: user.chat_id.clone(),
            channel: request.channel.clone(),
            pull_request: None,
        };
        info!(ticket = %ticket.id, kind = %kind, branch = %branch, "Deployment requested");

        let ack = format!("Preparing {} {phase} from {branch}", project.id);
        let preparer = self.preparer.clone();
        let notifier = self.notifier.clone();
        let clock = self.clock.clone();
        let tickets = self.tickets.clone();
        let uses_pull_request = kind.uses_pull_request();

        let task = tokio::spawn(async move {
            if uses_pull_request {
                let option = DeployOption {
                    branch: branch.clone(),
                    tag: None,
                    user: Some(user.clone()),
                    wait: false,
                };
                match preparer.prepare(&project, &phase, &option).await {
                    Ok(PrepareOutcome::Already { .. }) => {
                        notifier
                            .notify_and_wait(NotifyEvent::AlreadyDeployed {
                                channel: ticket.channel.clone(),
                                project: ticket.project.clone(),
                                phase: ticket.phase.clone(),
                                branch: ticket.branch.clone(),
                                timestamp: clock.now(),
                            })
                            .await;
                        return Outcome::AlreadyDeployed;
                    }
                    Ok(PrepareOutcome::Prepared { pull_request, .. }) => {
                        ticket.pull_request = Some(pull_request.reference());
                    }
                    Err(e) => {
                        warn!(error = %e, "Preparation failed");
                        notifier
                            .notify_and_wait(NotifyEvent::DeployFailed {
                                channel: ticket.channel.clone(),
                                project: ticket.project.clone(),
                                phase: ticket.phase.clone(),
                                user: user.chat_id.clone(),
                                error: e.to_string(),
                                timestamp: clock.now(),
                            })
                            .await;
                        return Outcome::Failed(e.to_string());
                    }
                }
            }

            tickets.lock().unwrap_or_else(PoisonError::into_inner).insert(
                ticket.id.clone(),
                IssuedTicket {
                    ticket: ticket.clone(),
                    state: WorkflowState::Requested,
                },
            );
            notifier
                .notify_and_wait(NotifyEvent::ApprovalRequested {
                    channel: ticket.channel.clone(),
                    project: ticket.project.clone(),
                    phase: ticket.phase.clone(),
                    branch: ticket.branch.clone(),
                    requester: ticket.requester.clone(),
                    ticket: ticket.id.clone(),
                    pull_request_url: ticket.pull_request.as_ref().map(|pr| pr.url.clone()),
                    warning,
                    timestamp: clock.now(),
                })
                .await;
            Outcome::AwaitingApproval(ticket)
        });

        Ok(Pending { ack, task })
    }

    /// Approve an issued ticket. Its target and pull request come from
    /// the stored ticket, never from the caller.
    #[instrument(skip(self))]
    pub async fn approve(&self, ticket: &str, approver: &str) -> Result<Pending> {
        let user = self.users.authorize(approver, Role::Developer)?;
        let pending = self.pending_ticket(ticket)?;
        self.check_lock(&pending.project, &pending.phase, &user).await?;
        let ticket = self.close_ticket(ticket, WorkflowState::Approved)?;
        info!(approver = %user.display_name, "Deployment approved");

        let ack = format!("Approved {} {} by {}", ticket.project, ticket.phase, user.display_name);
        let scm = self.scm.clone();
        let dispatcher = self.dispatcher.clone();
        let notifier = self.notifier.clone();
        let clock = self.clock.clone();

        let task = tokio::spawn(async move {
            let result = match &ticket.pull_request {
                Some(pr) => merge(scm.as_ref(), pr).await.map(|body| {
                    let event = NotifyEvent::PullRequestMerged {
                        channel: ticket.channel.clone(),
                        project: ticket.project.clone(),
                        phase: ticket.phase.clone(),
                        url: pr.url.clone(),
                        approver: user.chat_id.clone(),
                        body,
                        timestamp: clock.now(),
                    };
                    (event, Outcome::Merged { url: pr.url.clone() })
                }),
                None => {
                    let option = DeployOption {
                        branch: ticket.branch.clone(),
                        tag: None,
                        user: Some(user.clone()),
                        wait: true,
                    };
                    dispatcher
                        .deploy(&ticket.project, &ticket.phase, &option)
                        .await
                        .map(|output| {
                            let event = NotifyEvent::DeployFinished {
                                channel: ticket.channel.clone(),
                                project: ticket.project.clone(),
                                phase: ticket.phase.clone(),
                                user: user.chat_id.clone(),
                                success: output.status != DeployStatus::Fail,
                                detail: output.message.clone(),
                                timestamp: clock.now(),
                            };
                            (event, Outcome::Deployed(output))
                        })
                }
            };

            match result {
                Ok((event, outcome)) => {
                    notifier.notify_and_wait(event).await;
                    outcome
                }
                Err(e) => {
                    warn!(error = %e, "Approved deployment failed");
                    notifier
                        .notify_and_wait(NotifyEvent::DeployFailed {
                            channel: ticket.channel.clone(),
                            project: ticket.project.clone(),
                            phase: ticket.phase.clone(),
                            user: user.chat_id.clone(),
                            error: e.to_string(),
                            timestamp: clock.now(),
                        })
                        .await;
                    Outcome::Failed(e.to_string())
                }
            }
        });

        Ok(Pending { ack, task })
    }

    #[instrument(skip(self))]
    pub async fn reject(&self, ticket: &str, rejecter: &str) -> Result<Pending> {
        let user = self.users.authorize(rejecter, Role::Developer)?;
        let ticket = self.close_ticket(ticket, WorkflowState::Rejected)?;
        info!(user = %user.display_name, "Deployment rejected");

        let ack = format!("Rejected {} {} by {}", ticket.project, ticket.phase, user.display_name);
        let scm = self.scm.clone();
        let notifier = self.notifier.clone();
        let clock = self.clock.clone();

        let task = tokio::spawn(async move {
            let Some(pr) = &ticket.pull_request else {
                return Outcome::Closed;
            };
            let closed = async {
                scm.close_pull_request(pr.number).await?;
                let head = scm.get_pull_request(pr.number).await?.head;
                scm.delete_branch(&head).await
            }
            .await;

            match closed {
                Ok(()) => {
                    notifier
                        .notify_and_wait(NotifyEvent::PullRequestClosed {
                            channel: ticket.channel.clone(),
                            project: ticket.project.clone(),
                            phase: ticket.phase.clone(),
                            url: pr.url.clone(),
                            user: user.chat_id.clone(),
                            timestamp: clock.now(),
                        })
                        .await;
                    Outcome::Closed
                }
                Err(e) => {
                    notifier
                        .notify_and_wait(NotifyEvent::DeployFailed {
                            channel: ticket.channel.clone(),
                            project: ticket.project.clone(),
                            phase: ticket.phase.clone(),
                            user: user.chat_id.clone(),
                            error: e.to_string(),
                            timestamp: clock.now(),
                        })
                        .await;
                    Outcome::Failed(e.to_string())
                }
            }
        });

        Ok(Pending { ack, task })
    }

    pub async fn lock(&self, project: &str, phase: &str, user: &str, reason: &str) -> Result<()> {
        let user = self.users.authorize(user, Role::Developer)?;
        let (project, phase) = self.locate(project, phase)?;
        self.locks
            .lock(&project.id, &phase, &user.display_name, reason)
            .await
    }

    /// Release a lock; admins may release other users' locks.
    pub async fn unlock(&self, project: &str, phase: &str, user: &str) -> Result<()> {
        let user = self.users.authorize(user, Role::Developer)?;
        let (project, phase) = self.locate(project, phase)?;
        self.locks
            .unlock(&project.id, &phase, &user.display_name, user.is_admin())
            .await
    }

    /// Locked phases as chat text.
    pub async fn describe_locks(&self) -> Result<String> {
        Ok(render_locks(&self.locks.describe_locks().await?))
    }

    /// Swap in a freshly loaded catalog. Running schedulers keep the
    /// phases they were spawned with.
    pub fn reload(&self, user: &str, doc: CatalogDocument) -> Result<usize> {
        let user = self.users.authorize(user, Role::Admin)?;
        let projects = doc.projects.len();
        self.dispatcher.catalog().replace(doc.projects);
        self.users.replace(doc.users);
        info!(user = %user.display_name, projects, "Catalog reloaded");
        Ok(projects)
    }
}

/// Merge a pull request and return its body trimmed for chat.
async fn merge(scm: &dyn SourceControl, pr: &PullRequestRef) -> Result<String> {
    scm.merge_pull_request(pr.number).await?;
    let body = scm.get_pull_request(pr.number).await?.body;
    Ok(truncate_body(&body, MAX_BODY_CHARS))
}

/// Cut `body` to at most `max` characters, ending on a whole line.
pub fn truncate_body(body: &str, max: usize) -> String {
    let Some((cut, _)) = body.char_indices().nth(max) else {
        return body.to_string();
    };
    let prefix = &body[..cut];
    match prefix.rfind('\n') {
        Some(newline) => prefix[..newline].to_string(),
        None => prefix.to_string(),
    }
}
