//! Per-identity mutual exclusion.
//!
//! Workflow runs for the same identity are serialized; runs for different
//! identities never contend. Table entries are dropped once no run holds or
//! waits on them.

use crate::model::Identity;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct IdentityLocks {
    table: Mutex<HashMap<Identity, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one workflow run.
pub struct IdentityGuard {
    _guard: OwnedMutexGuard<()>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, identity: &Identity) -> IdentityGuard {
        let lock = {
            let mut table = self.table.lock();
            // Only the table holds these, so nobody is using them.
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            table
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        IdentityGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of identities with a live entry.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
