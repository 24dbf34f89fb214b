//! Slack Web API notification channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::NotifyEvent;
use crate::NotifyChannel;

/// Environment variable for the Slack bot token.
const ENV_SLACK_BOT_TOKEN: &str = "SLACK_BOT_TOKEN";

/// Environment variable overriding the Slack API base URL.
const ENV_SLACK_API_URL: &str = "SLACK_API_URL";

const DEFAULT_API_URL: &str = "https://slack.com/api";

/// Slack channel posting through `chat.postMessage`.
pub struct SlackChannel {
    bot_token: Option<String>,
    api_url: String,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Create a new Slack channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let bot_token = std::env::var(ENV_SLACK_BOT_TOKEN)
            .ok()
            .filter(|t| !t.is_empty());
        let api_url =
            std::env::var(ENV_SLACK_API_URL).unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        if bot_token.is_some() {
            debug!("Slack notifications enabled");
        } else {
            debug!("Slack notifications disabled (SLACK_BOT_TOKEN not set)");
        }

        Self {
            bot_token,
            api_url,
            client: reqwest::Client::new(),
        }
    }

    /// Create a Slack channel with a specific bot token.
    #[must_use]
    pub fn new(bot_token: String) -> Self {
        Self::with_api_url(bot_token, DEFAULT_API_URL.to_string())
    }

    /// Create a Slack channel against a non-default API endpoint.
    #[must_use]
    pub fn with_api_url(bot_token: String, api_url: String) -> Self {
        Self {
            bot_token: Some(bot_token),
            api_url: api_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Format an event as a `chat.postMessage` payload.
    fn format_payload(event: &NotifyEvent) -> SlackPayload {
        let fields = Self::format_fields(event)
            .into_iter()
            .map(|(title, value)| SlackField {
                title,
                value,
                short: true,
            })
            .collect();

        let attachment = SlackAttachment {
            fallback: event.title(),
            color: event.severity().color().to_string(),
            title: event.title(),
            text: Self::format_description(event),
            fields,
            footer: Some(format!(
                "{} | {}",
                event.severity().as_str(),
                event.timestamp().format("%Y-%m-%d %H:%M:%S UTC")
            )),
            ts: Some(event.timestamp().timestamp()),
        };

        SlackPayload {
            channel: event.channel().to_string(),
            text: event.title(),
            attachments: vec![attachment],
        }
    }

    /// Format the description for an event.
    fn format_description(event: &NotifyEvent) -> String {
        match event {
            NotifyEvent::AutoDeployed { project, tag, .. } => {
                format!("`{project}` is now running `{tag}`")
            }

            NotifyEvent::ApprovalRequested {
                requester,
                branch,
                pull_request_url,
                warning,
                ..
            } => {
                let mut text = format!("<@{requester}> requested a deployment of `{branch}`");
                if let Some(url) = pull_request_url {
                    text.push_str(&format!("\n{url}"));
                }
                if let Some(warning) = warning {
                    text.push_str(&format!("\n:warning: {warning}"));
                }
                text
            }

            NotifyEvent::AlreadyDeployed { branch, .. } => {
                format!("`{branch}` is already deployed")
            }

            NotifyEvent::PullRequestMerged {
                url,
                approver,
                body,
                ..
            } => {
                if body.is_empty() {
                    format!("{url} merged by <@{approver}>")
                } else {
                    format!("{url} merged by <@{approver}>\n{body}")
                }
            }

            NotifyEvent::PullRequestClosed { url, user, .. } => {
                format!("{url} closed by <@{user}>")
            }

            NotifyEvent::DeployFinished {
                user,
                success,
                detail,
                ..
            } => {
                let status = if *success {
                    "✅ Success"
                } else {
                    "❌ Failed"
                };
                format!("{status} (requested by <@{user}>)\n{detail}")
            }

            NotifyEvent::DeployFailed { user, error, .. } => {
                format!("<@{user}> {error}")
            }
        }
    }

    /// Format additional fields for an event.
    fn format_fields(event: &NotifyEvent) -> Vec<(String, String)> {
        match event {
            NotifyEvent::ApprovalRequested {
                project,
                phase,
                ticket,
                ..
            } => vec![
                ("Project".to_string(), project.clone()),
                ("Phase".to_string(), phase.clone()),
                ("Ticket".to_string(), ticket.clone()),
            ],

            NotifyEvent::AutoDeployed { project, phase, .. }
            | NotifyEvent::AlreadyDeployed { project, phase, .. }
            | NotifyEvent::PullRequestMerged { project, phase, .. }
            | NotifyEvent::PullRequestClosed { project, phase, .. }
            | NotifyEvent::DeployFinished { project, phase, .. }
            | NotifyEvent::DeployFailed { project, phase, .. } => vec![
                ("Project".to_string(), project.clone()),
                ("Phase".to_string(), phase.clone()),
            ],
        }
    }
}

#[async_trait]
impl NotifyChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.bot_token.is_some()
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        let token = self
            .bot_token
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(ENV_SLACK_BOT_TOKEN.to_string()))?;

        let payload = Self::format_payload(event);

        debug!(chat_channel = %payload.channel, title = %payload.text, "Posting to Slack");

        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.api_url))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(ChannelError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "slack",
                status = %status,
                body = %body,
                "Slack API request failed"
            );

            return Err(ChannelError::Other(format!(
                "Slack returned {status}: {body}"
            )));
        }

        let reply: SlackReply = response.json().await?;
        if reply.ok {
            debug!(channel = "slack", "Notification sent successfully");
            Ok(())
        } else {
            let reason = reply.error.unwrap_or_else(|| "unknown_error".to_string());
            warn!(channel = "slack", error = %reason, "Slack rejected message");
            Err(ChannelError::Rejected(reason))
        }
    }
}

// =============================================================================
// Slack API types
// =============================================================================

#[derive(Debug, Serialize)]
struct SlackPayload {
    channel: String,
    text: String,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    fallback: String,
    color: String,
    title: String,
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<SlackField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}

#[derive(Debug, Deserialize)]
struct SlackReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}
