//! Chat notifications for deployment events.
//!
//! Every [`NotifyEvent`] names the chat channel it is addressed to; a
//! [`Notifier`] hands it to each configured backend (currently Slack).
//! The engine reports each terminal outcome exactly once and awaits the
//! delivery through [`Notifier::notify_and_wait`].
//!
//! ```no_run
//! use notify::{Notifier, NotifyEvent};
//!
//! # async fn run() {
//! let notifier = Notifier::from_env();
//! notifier
//!     .notify_and_wait(NotifyEvent::AutoDeployed {
//!         channel: "C0123456".to_string(),
//!         project: "api".to_string(),
//!         phase: "staging".to_string(),
//!         tag: "a1b2c3d".to_string(),
//!         timestamp: chrono::Utc::now(),
//!     })
//!     .await;
//! # }
//! ```
//!
//! Environment:
//! - `SLACK_BOT_TOKEN` enables the Slack backend
//! - `SLACK_API_URL` overrides the Slack Web API base URL
//! - `NOTIFY_DISABLED=true` turns every backend off

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::slack::SlackChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::{NotifyEvent, Severity};

use std::sync::Arc;
use tracing::{debug, info, warn};

const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Result of handing one event to one backend.
#[derive(Debug)]
pub struct Delivery {
    pub channel: &'static str,
    pub result: Result<(), ChannelError>,
}

impl Delivery {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fans events out to the configured chat backends.
#[derive(Clone, Default)]
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
}

impl Notifier {
    /// Configure backends from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .is_ok_and(|v| v.eq_ignore_ascii_case("true") || v == "1");
        if disabled {
            info!("Notifications disabled via {ENV_NOTIFY_DISABLED}");
            return Self::disabled();
        }

        let slack = SlackChannel::from_env();
        if !slack.enabled() {
            warn!("SLACK_BOT_TOKEN not set - deployment events will only be logged");
            return Self::disabled();
        }
        info!("Slack notifications enabled");
        Self::with_channels(vec![Arc::new(slack)])
    }

    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self { channels }
    }

    /// A notifier that drops every event.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { channels: vec![] }
    }

    pub fn is_enabled(&self) -> bool {
        self.channels.iter().any(|c| c.enabled())
    }

    /// Deliver and report the outcome per backend.
    pub async fn notify_and_wait(&self, event: NotifyEvent) -> Vec<Delivery> {
        if !self.is_enabled() {
            debug!(title = %event.title(), "No chat backend, dropping event");
            return vec![];
        }
        let mut deliveries = Vec::with_capacity(self.channels.len());
        for channel in self.channels.iter().filter(|c| c.enabled()) {
            deliveries.push(deliver(channel.as_ref(), &event).await);
        }
        deliveries
    }
}

async fn deliver(channel: &dyn NotifyChannel, event: &NotifyEvent) -> Delivery {
    let result = channel.send(event).await;
    match &result {
        Ok(()) => debug!(
            channel = channel.name(),
            chat_channel = event.channel(),
            "Event delivered"
        ),
        Err(e) => warn!(
            channel = channel.name(),
            chat_channel = event.channel(),
            error = %e,
            "Event delivery failed"
        ),
    }
    Delivery {
        channel: channel.name(),
        result,
    }
}
