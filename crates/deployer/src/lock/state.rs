//! Per-phase lock record and its persisted JSON encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

/// Maximum number of history entries kept per phase.
pub const MAX_HISTORY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockAction {
    Lock,
    Unlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEvent {
    pub user: String,
    pub action: LockAction,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
}

/// Lock state of a single (project, phase) pair.
///
/// Serializes as `{"locked":bool,"history":[...]}`, oldest event first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub locked: bool,
    #[serde(default)]
    pub history: Vec<LockEvent>,
}

impl LockState {
    /// Decode a stored value. An empty value is an unlocked phase.
    pub fn decode(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The most recent event, if any.
    pub fn last_event(&self) -> Option<&LockEvent> {
        self.history.last()
    }

    /// The user holding the lock, if the phase is locked.
    pub fn holder(&self) -> Option<&str> {
        if !self.locked {
            return None;
        }
        self.history
            .iter()
            .rev()
            .find(|e| e.action == LockAction::Lock)
            .map(|e| e.user.as_str())
    }

    pub fn lock(&mut self, user: &str, reason: &str, at: DateTime<Utc>) -> Result<()> {
        if self.locked {
            return Err(DeployError::AlreadyLocked);
        }
        self.locked = true;
        self.push(LockEvent {
            user: user.to_string(),
            action: LockAction::Lock,
            at,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Release the lock. Only the most recent locker may unlock unless `force`.
    pub fn unlock(&mut self, user: &str, force: bool, at: DateTime<Utc>) -> Result<()> {
        if !self.locked {
            return Err(DeployError::AlreadyUnlocked);
        }
        if !force {
            if let Some(last) = self.last_event() {
                if last.user != user {
                    return Err(DeployError::NotAllowedToUnlock(user.to_string()));
                }
            }
        }
        self.locked = false;
        self.push(LockEvent {
            user: user.to_string(),
            action: LockAction::Unlock,
            at,
            reason: String::new(),
        });
        Ok(())
    }

    fn push(&mut self, event: LockEvent) {
        let keep = MAX_HISTORY - 1;
        if self.history.len() > keep {
            self.history.drain(..self.history.len() - keep);
        }
        self.history.push(event);
    }
}

/// Storage key of a (project, phase) pair.
pub fn lock_key(project: &str, phase: &str) -> String {
    format!("{project}-{phase}")
}

/// Split a storage key at its last `-`.
///
/// Phase names never contain `-`; project ids may.
pub fn split_lock_key(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once('-')
        .filter(|(project, phase)| !project.is_empty() && !phase.is_empty())
}
