//! Periodic roll-forward of phases with automatic deploys enabled.
//!
//! Each (project, phase) runs its own timer task. A tick resolves the
//! newest tag of the project's default branch and deploys it when it
//! differs from the destination's running revision and the phase is not
//! locked.

use std::sync::Arc;
use std::time::Duration;

use notify::{Notifier, NotifyEvent};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::destination::DestinationReader;
use crate::dispatch::DeployDispatcher;
use crate::lock::LockCoordinator;
use crate::model::{DeployOption, DeployStatus};
use crate::registry::ImageTagResolver;

/// What a single scheduler tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No tag matches the default branch yet
    Unresolved,
    UpToDate,
    /// The phase is locked by the named user
    Locked(String),
    Deployed(String),
    Failed(String),
}

pub struct AutoDeployScheduler {
    dispatcher: Arc<DeployDispatcher>,
    resolver: Arc<ImageTagResolver>,
    destinations: Arc<DestinationReader>,
    locks: Arc<LockCoordinator>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl AutoDeployScheduler {
    pub fn new(
        dispatcher: Arc<DeployDispatcher>,
        resolver: Arc<ImageTagResolver>,
        destinations: Arc<DestinationReader>,
        locks: Arc<LockCoordinator>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            dispatcher,
            resolver,
            destinations,
            locks,
            notifier,
            clock,
            interval,
        }
    }

    /// Start one timer task per auto-deploy phase.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let targets = self.dispatcher.catalog().auto_deploy_targets();
        info!(targets = targets.len(), "Starting auto deploy scheduler");
        targets
            .into_iter()
            .map(|(project, phase)| {
                let scheduler = Arc::clone(self);
                tokio::spawn(async move { scheduler.run(project, phase).await })
            })
            .collect()
    }

    async fn run(self: Arc<Self>, project: String, phase: String) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let outcome = self.tick(&project, &phase).await;
            debug!(project = %project, phase = %phase, outcome = ?outcome, "Auto deploy tick");
        }
    }

    #[instrument(skip(self))]
    pub async fn tick(&self, project_id: &str, phase: &str) -> TickOutcome {
        let project = match self.dispatcher.catalog().find(project_id) {
            Ok(p) => p,
            Err(e) => return TickOutcome::Failed(e.to_string()),
        };
        let ph = match project.phase(phase) {
            Ok(ph) => ph.clone(),
            Err(e) => return TickOutcome::Failed(e.to_string()),
        };
        let branch = project.default_branch().to_string();

        let tag = match self.resolver.resolve_for(&project, phase, &branch).await {
            Ok(tag) => tag,
            Err(e) => {
                debug!(error = %e, "No tag to roll forward to");
                return TickOutcome::Unresolved;
            }
        };

        match self.destinations.current_revision(ph.destination()).await {
            Ok(current) if current == tag => return TickOutcome::UpToDate,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Cannot read running revision");
                return TickOutcome::Failed(e.to_string());
            }
        }

        match self.locks.state(project_id, phase).await {
            Ok(state) if state.locked => {
                let holder = state.holder().unwrap_or("unknown").to_string();
                info!(holder = %holder, "Phase locked, skipping auto deploy");
                return TickOutcome::Locked(holder);
            }
            Ok(_) => {}
            Err(e) => return TickOutcome::Failed(e.to_string()),
        }

        let option = DeployOption {
            branch,
            tag: Some(tag.clone()),
            user: None,
            wait: true,
        };
        match self.dispatcher.deploy(project_id, phase, &option).await {
            Ok(output) if output.status == DeployStatus::Success => {
                info!(tag = %tag, "Auto deployed");
                if let Some(channel) = &ph.notify_channel {
                    self.notifier
                        .notify_and_wait(NotifyEvent::AutoDeployed {
                            channel: channel.clone(),
                            project: project_id.to_string(),
                            phase: phase.to_string(),
                            tag: tag.clone(),
                            timestamp: self.clock.now(),
                        })
                        .await;
                }
                TickOutcome::Deployed(tag)
            }
            Ok(output) if output.status == DeployStatus::Already => TickOutcome::UpToDate,
            Ok(output) => {
                error!(message = %output.message, "Auto deploy reported failure");
                TickOutcome::Failed(output.message)
            }
            Err(e) => {
                error!(error = %e, "Auto deploy failed");
                TickOutcome::Failed(e.to_string())
            }
        }
    }
}
