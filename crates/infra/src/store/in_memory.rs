use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{SnapshotStore, StoreError};

/// In-memory snapshot store for tests/dev.
///
/// Can be switched into a failing mode to exercise persistence-error paths.
#[derive(Debug)]
pub struct InMemoryStore<T> {
    value: Mutex<Option<T>>,
    failing: AtomicBool,
    saves: AtomicUsize,
}

impl<T> InMemoryStore<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            failing: AtomicBool::new(false),
            saves: AtomicUsize::new(0),
        }
    }

    /// Pre-seeded store, as if a previous process had saved `value`.
    pub fn with_value(value: T) -> Self {
        let store = Self::new();
        *store.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
        store
    }

    /// Make every subsequent load/save fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl<T> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> SnapshotStore<T> for InMemoryStore<T> {
    fn load(&self) -> Result<Option<T>, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("in-memory store set to fail".to_string()));
        }
        Ok(self.value.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, value: &T) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("in-memory store set to fail".to_string()));
        }
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(value.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
