//! Round-robin credential pool with permanent banning.
//!
//! The cursor, the liveness flags and the write-through to the backing store
//! all happen under one mutex: a `next()` that runs after a `ban()` returns
//! can never hand out the banned credential.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use turnstile_core::{Credential, CredentialView, DomainError, Entity, NewCredential};

use crate::store::SnapshotStore;

/// Credential pool error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("no live credentials remain")]
    Exhausted,
    #[error("credential not found: {0}")]
    NotFound(String),
    #[error("credential already exists: {0}")]
    Duplicate(String),
    #[error(transparent)]
    Validation(#[from] DomainError),
}

#[derive(Debug, Default)]
struct PoolState {
    credentials: Vec<Credential>,
    cursor: usize,
}

impl PoolState {
    fn position(&self, name: &str) -> Option<usize> {
        self.credentials.iter().position(|c| c.id() == name)
    }
}

/// Rotating set of credentials.
pub struct CredentialPool {
    state: Mutex<PoolState>,
    store: Arc<dyn SnapshotStore<Vec<Credential>>>,
}

impl core::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.lock();
        f.debug_struct("CredentialPool")
            .field("credentials", &state.credentials)
            .field("cursor", &state.cursor)
            .finish()
    }
}

impl CredentialPool {
    /// Open the pool from its backing store.
    ///
    /// A store that cannot be read leaves the pool empty (logged); admins can
    /// append credentials or `reload()` once the store recovers.
    pub fn open(store: Arc<dyn SnapshotStore<Vec<Credential>>>) -> Self {
        let credentials = match store.load() {
            Ok(Some(credentials)) => credentials,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "failed to load credentials; starting with an empty pool");
                Vec::new()
            }
        };
        info!(
            total = credentials.len(),
            live = credentials.iter().filter(|c| c.alive).count(),
            "credential pool opened"
        );

        Self {
            state: Mutex::new(PoolState {
                credentials,
                cursor: 0,
            }),
            store,
        }
    }

    /// Next live credential in round-robin order.
    pub fn next(&self) -> Result<Credential, PoolError> {
        let mut state = self.lock();
        let len = state.credentials.len();

        for step in 0..len {
            let idx = (state.cursor + step) % len;
            if state.credentials[idx].alive {
                state.cursor = (idx + 1) % len;
                let picked = state.credentials[idx].clone();
                debug!(credential = %picked.name, "credential selected");
                return Ok(picked);
            }
        }

        Err(PoolError::Exhausted)
    }

    /// Permanently retire a credential proven dead.
    ///
    /// Returns `false` if no credential with that name is live.
    pub fn ban(&self, name: &str) -> bool {
        let mut state = self.lock();
        let Some(idx) = state.position(name) else {
            warn!(credential = name, "ban requested for unknown credential");
            return false;
        };
        if !state.credentials[idx].alive {
            return false;
        }

        state.credentials[idx].alive = false;
        let live = state.credentials.iter().filter(|c| c.alive).count();
        warn!(credential = name, live, "credential banned");
        self.write_through(&state);
        true
    }

    /// Validate and add credentials. All-or-nothing: one invalid or duplicate
    /// entry rejects the whole batch.
    pub fn append(&self, incoming: Vec<NewCredential>) -> Result<usize, PoolError> {
        let mut state = self.lock();
        let template = state.credentials.first().cloned();

        let mut accepted: Vec<Credential> = Vec::with_capacity(incoming.len());
        for raw in incoming {
            let credential = raw.validate(template.as_ref())?;
            let clash = state.position(&credential.name).is_some()
                || accepted.iter().any(|c| c.name == credential.name);
            if clash {
                return Err(PoolError::Duplicate(credential.name));
            }
            accepted.push(credential);
        }

        let added = accepted.len();
        state.credentials.extend(accepted);
        info!(added, total = state.credentials.len(), "credentials appended");
        self.write_through(&state);
        Ok(added)
    }

    /// Remove one credential by name.
    pub fn delete(&self, name: &str) -> Result<(), PoolError> {
        let mut state = self.lock();
        let idx = state
            .position(name)
            .ok_or_else(|| PoolError::NotFound(name.to_string()))?;

        state.credentials.remove(idx);
        if idx < state.cursor {
            state.cursor -= 1;
        }
        if state.cursor >= state.credentials.len() {
            state.cursor = 0;
        }
        info!(credential = name, "credential deleted");
        self.write_through(&state);
        Ok(())
    }

    /// Remove every credential.
    pub fn clear(&self) {
        let mut state = self.lock();
        let removed = state.credentials.len();
        state.credentials.clear();
        state.cursor = 0;
        info!(removed, "credential pool cleared");
        self.write_through(&state);
    }

    /// Replace the in-memory set with the stored one.
    pub fn reload(&self) -> Result<usize, crate::store::StoreError> {
        let credentials = self.store.load()?.unwrap_or_default();
        let mut state = self.lock();
        state.credentials = credentials;
        state.cursor = 0;
        info!(total = state.credentials.len(), "credential pool reloaded");
        Ok(state.credentials.len())
    }

    /// Display-safe listing, in rotation order.
    pub fn list(&self) -> Vec<CredentialView> {
        self.lock().credentials.iter().map(Credential::view).collect()
    }

    pub fn live_count(&self) -> usize {
        self.lock().credentials.iter().filter(|c| c.alive).count()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Runs with the state lock held so store order matches mutation order.
    fn write_through(&self, state: &PoolState) {
        if let Err(e) = self.store.save(&state.credentials) {
            warn!(error = %e, "failed to persist credential set; continuing in memory");
        }
    }
}
