//! Per-(project, phase) deployment locks.
//!
//! All locks live in one shared document. Every mutation is a
//! read-modify-write cycle retried on version conflicts, so concurrent
//! replicas never lose each other's updates.

pub mod configmap;
pub mod state;
pub mod store;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

pub use configmap::ConfigMapLockStore;
pub use state::{lock_key, split_lock_key, LockAction, LockEvent, LockState, MAX_HISTORY};
pub use store::{LockSnapshot, LockStore, MemoryLockStore};

use crate::clock::Clock;
use crate::error::{DeployError, Result, StoreError};

/// Conflicting writes tolerated before a mutation gives up.
pub const MAX_UPDATE_RETRIES: usize = 3;

/// Lock states of one project, phases in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLocks {
    pub project: String,
    pub phases: Vec<(String, LockState)>,
}

pub struct LockCoordinator {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    max_retries: usize,
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            max_retries: MAX_UPDATE_RETRIES,
        }
    }

    #[instrument(skip(self, reason))]
    pub async fn lock(&self, project: &str, phase: &str, user: &str, reason: &str) -> Result<()> {
        let at = self.clock.now();
        self.update(&lock_key(project, phase), "acquire", |state| {
            state.lock(user, reason, at)
        })
        .await?;
        info!(project, phase, user, "Phase locked");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn unlock(&self, project: &str, phase: &str, user: &str, force: bool) -> Result<()> {
        let at = self.clock.now();
        self.update(&lock_key(project, phase), "release", |state| {
            state.unlock(user, force, at)
        })
        .await?;
        info!(project, phase, user, force, "Phase unlocked");
        Ok(())
    }

    /// Current state of one phase; absent entries are unlocked.
    pub async fn state(&self, project: &str, phase: &str) -> Result<LockState> {
        let snapshot = self.store.load().await?;
        snapshot
            .entries
            .get(&lock_key(project, phase))
            .map_or_else(|| Ok(LockState::default()), |raw| LockState::decode(raw))
    }

    /// Recorded lock states keyed by project then phase, optionally
    /// restricted to an exact project and/or phase.
    pub async fn fetch_locks(
        &self,
        project_filter: Option<&str>,
        phase_filter: Option<&str>,
    ) -> Result<BTreeMap<String, BTreeMap<String, LockState>>> {
        let snapshot = self.store.load().await?;
        let mut locks: BTreeMap<String, BTreeMap<String, LockState>> = BTreeMap::new();
        for (key, raw) in &snapshot.entries {
            let Some((project, phase)) = split_lock_key(key) else {
                warn!(key = %key, "Skipping malformed lock key");
                continue;
            };
            if project_filter.is_some_and(|f| f != project)
                || phase_filter.is_some_and(|f| f != phase)
            {
                continue;
            }
            locks
                .entry(project.to_string())
                .or_default()
                .insert(phase.to_string(), LockState::decode(raw)?);
        }
        Ok(locks)
    }

    /// Lock states sorted for display: projects by name, phases by priority.
    pub async fn describe_locks(&self) -> Result<Vec<ProjectLocks>> {
        let locks = self.fetch_locks(None, None).await?;
        Ok(locks
            .into_iter()
            .map(|(project, phases)| {
                let mut phases: Vec<_> = phases.into_iter().collect();
                phases.sort_by(|(a, _), (b, _)| {
                    phase_priority(a).cmp(&phase_priority(b)).then_with(|| a.cmp(b))
                });
                ProjectLocks { project, phases }
            })
            .collect())
    }

    async fn update<F>(&self, key: &str, action: &'static str, mutate: F) -> Result<()>
    where
        F: Fn(&mut LockState) -> Result<()>,
    {
        for attempt in 0..=self.max_retries {
            let mut snapshot = self.store.load().await?;
            let mut state = match snapshot.entries.get(key) {
                Some(raw) => LockState::decode(raw)?,
                None => LockState::default(),
            };
            mutate(&mut state)?;
            snapshot.entries.insert(key.to_string(), state.encode()?);

            match self.store.save(snapshot).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Conflict) => {
                    debug!(key, attempt, "Lock document changed, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!(key, action, "Giving up on lock update after repeated conflicts");
        Err(DeployError::LockConflictExhausted {
            action,
            retries: self.max_retries,
        })
    }
}

/// Display rank of a phase name; production first.
pub fn phase_priority(phase: &str) -> u8 {
    match phase {
        "production" => 1,
        "staging" => 2,
        _ => 3,
    }
}

/// Render the locked phases as chat text.
pub fn render_locks(projects: &[ProjectLocks]) -> String {
    let mut out = String::new();
    for project in projects {
        let locked: Vec<_> = project.phases.iter().filter(|(_, s)| s.locked).collect();
        if locked.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{}", project.project);
        for (phase, state) in locked {
            let user = state.holder().unwrap_or("unknown");
            let reason = state
                .last_event()
                .map(|e| e.reason.as_str())
                .unwrap_or_default();
            if reason.is_empty() {
                let _ = writeln!(out, "  {phase}: Locked (by {user})");
            } else {
                let _ = writeln!(out, "  {phase}: Locked (by {user}, for {reason})");
            }
        }
    }
    out
}
