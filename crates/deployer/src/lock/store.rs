//! Versioned storage of the shared lock document.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// The whole lock document as read from the store.
///
/// `version` is an opaque token; a write carrying a stale version fails
/// with [`StoreError::Conflict`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSnapshot {
    pub version: Option<String>,
    pub entries: BTreeMap<String, String>,
}

#[async_trait]
pub trait LockStore: Send + Sync {
    async fn load(&self) -> Result<LockSnapshot, StoreError>;

    /// Persist `snapshot` if its version still matches the stored one.
    async fn save(&self, snapshot: LockSnapshot) -> Result<(), StoreError>;
}

/// In-memory store with the same optimistic-concurrency contract.
#[derive(Default)]
pub struct MemoryLockStore {
    inner: RwLock<(u64, BTreeMap<String, String>)>,
    pending_conflicts: AtomicUsize,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` saves fail as if another writer got there first.
    pub fn inject_conflicts(&self, n: usize) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    pub async fn entries(&self) -> BTreeMap<String, String> {
        self.inner.read().await.1.clone()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn load(&self) -> Result<LockSnapshot, StoreError> {
        let guard = self.inner.read().await;
        Ok(LockSnapshot {
            version: Some(guard.0.to_string()),
            entries: guard.1.clone(),
        })
    }

    async fn save(&self, snapshot: LockSnapshot) -> Result<(), StoreError> {
        let injected = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Conflict);
        }

        let mut guard = self.inner.write().await;
        if snapshot.version.as_deref() != Some(guard.0.to_string().as_str()) {
            return Err(StoreError::Conflict);
        }
        guard.0 += 1;
        guard.1 = snapshot.entries;
        Ok(())
    }
}
