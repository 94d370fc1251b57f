//! In-memory store used by orchestrator tests.

use super::{StateStore, TokenResolver};
use crate::error::InfrastructureError;
use crate::model::{Identity, PersistedState};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<Identity, PersistedState>>,
    tokens: RwLock<HashMap<Identity, String>>,
    connects: AtomicU32,
    reads: AtomicU32,
    writes: AtomicU32,
    token_reads: AtomicU32,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, state: PersistedState) {
        self.states.write().insert(state.identity.clone(), state);
    }

    pub fn set_token(&self, identity: &Identity, token: &str) {
        self.tokens.write().insert(identity.clone(), token.to_string());
    }

    /// Make `connect` fail from now on.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn snapshot(&self, identity: &Identity) -> Option<PersistedState> {
        self.states.read().get(identity).cloned()
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn token_reads(&self) -> u32 {
        self.token_reads.load(Ordering::SeqCst)
    }

    /// Total calls of any kind.
    pub fn calls(&self) -> u32 {
        self.connects() + self.reads() + self.writes() + self.token_reads()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn connect(&self) -> Result<(), InfrastructureError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(InfrastructureError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }

    async fn get(
        &self,
        identity: &Identity,
    ) -> Result<Option<PersistedState>, InfrastructureError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.states.read().get(identity).cloned())
    }

    async fn put(&self, state: &PersistedState) -> Result<(), InfrastructureError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.states
            .write()
            .insert(state.identity.clone(), state.clone());
        Ok(())
    }
}

#[async_trait]
impl TokenResolver for MemoryStore {
    async fn notification_token(
        &self,
        identity: &Identity,
    ) -> Result<Option<String>, InfrastructureError> {
        self.token_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.tokens.read().get(identity).cloned())
    }
}
