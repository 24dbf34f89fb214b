//! Notification event types emitted by the deployment engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for deployment notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - normal operations
    Info,
    /// Warning - something needs attention
    Warning,
    /// Critical - a deployment failed
    Critical,
}

impl Severity {
    /// Get the attachment color for this severity.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Info => "#3498db",
            Self::Warning => "#f39c12",
            Self::Critical => "#e74c3c",
        }
    }

    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// Events that can trigger notifications.
///
/// Every event names the chat channel it is addressed to; channels that
/// post to a single destination are free to ignore it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// The scheduler rolled a phase forward to a new tag
    AutoDeployed {
        channel: String,
        project: String,
        phase: String,
        tag: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A deployment was prepared and waits for approval
    ApprovalRequested {
        channel: String,
        project: String,
        phase: String,
        branch: String,
        requester: String,
        ticket: String,
        #[serde(default)]
        pull_request_url: Option<String>,
        #[serde(default)]
        warning: Option<String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// The destination already runs the requested revision
    AlreadyDeployed {
        channel: String,
        project: String,
        phase: String,
        branch: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// An approved pull request was merged
    PullRequestMerged {
        channel: String,
        project: String,
        phase: String,
        url: String,
        approver: String,
        #[serde(default)]
        body: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A rejected pull request was closed
    PullRequestClosed {
        channel: String,
        project: String,
        phase: String,
        url: String,
        user: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A deployment mechanism reached a terminal state
    DeployFinished {
        channel: String,
        project: String,
        phase: String,
        user: String,
        success: bool,
        #[serde(default)]
        detail: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A request could not be carried out
    DeployFailed {
        channel: String,
        project: String,
        phase: String,
        user: String,
        error: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Get a short title for this event type.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::AutoDeployed {
                project, phase, tag, ..
            } => format!("Auto deployed {project} {phase}: {tag}"),
            Self::ApprovalRequested { project, phase, .. } => {
                format!("Approval requested: {project} {phase}")
            }
            Self::AlreadyDeployed { project, phase, .. } => {
                format!("Already deployed: {project} {phase}")
            }
            Self::PullRequestMerged { project, phase, .. } => {
                format!("Merged: {project} {phase}")
            }
            Self::PullRequestClosed { project, phase, .. } => {
                format!("Closed: {project} {phase}")
            }
            Self::DeployFinished {
                project,
                phase,
                success,
                ..
            } => {
                let status = if *success { "Succeeded" } else { "Failed" };
                format!("Deploy {status}: {project} {phase}")
            }
            Self::DeployFailed { project, phase, .. } => {
                format!("Deployment failed: {project} {phase}")
            }
        }
    }

    /// Get the severity for this event.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::AutoDeployed { .. }
            | Self::AlreadyDeployed { .. }
            | Self::PullRequestMerged { .. }
            | Self::PullRequestClosed { .. } => Severity::Info,
            Self::ApprovalRequested { warning, .. } => {
                if warning.is_some() {
                    Severity::Warning
                } else {
                    Severity::Info
                }
            }
            Self::DeployFinished { success, .. } => {
                if *success {
                    Severity::Info
                } else {
                    Severity::Critical
                }
            }
            Self::DeployFailed { .. } => Severity::Critical,
        }
    }

    /// The chat channel this event is addressed to.
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            Self::AutoDeployed { channel, .. }
            | Self::ApprovalRequested { channel, .. }
            | Self::AlreadyDeployed { channel, .. }
            | Self::PullRequestMerged { channel, .. }
            | Self::PullRequestClosed { channel, .. }
            | Self::DeployFinished { channel, .. }
            | Self::DeployFailed { channel, .. } => channel,
        }
    }

    /// Get the timestamp for this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::AutoDeployed { timestamp, .. }
            | Self::ApprovalRequested { timestamp, .. }
            | Self::AlreadyDeployed { timestamp, .. }
            | Self::PullRequestMerged { timestamp, .. }
            | Self::PullRequestClosed { timestamp, .. }
            | Self::DeployFinished { timestamp, .. }
            | Self::DeployFailed { timestamp, .. } => *timestamp,
        }
    }
}
