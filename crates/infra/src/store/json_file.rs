//! JSON snapshot file with atomic replacement.

use std::fs;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{SnapshotStore, StoreError};

const DEFAULT_LOAD_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_PAUSE: Duration = Duration::from_millis(100);

/// File-backed snapshot store.
///
/// - `save` writes a `NamedTempFile` next to the target, fsyncs it, then
///   renames it over the target, so readers see either the old or the new
///   snapshot, never a partial one
/// - saves from different threads are serialized by an internal lock
/// - a missing file loads as `None`; an unreadable or corrupt file is retried
///   a bounded number of times before `StoreError::Corrupt` is returned
#[derive(Debug)]
pub struct JsonFileStore<T> {
    path: PathBuf,
    load_attempts: u32,
    retry_pause: Duration,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            load_attempts: DEFAULT_LOAD_ATTEMPTS,
            retry_pause: DEFAULT_RETRY_PAUSE,
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Total read attempts for an unreadable file (minimum 1).
    pub fn with_load_attempts(mut self, attempts: u32) -> Self {
        self.load_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    fn write_atomic(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = self.dir();
        fs::create_dir_all(dir)
            .map_err(|e| StoreError::Io(format!("cannot create {}: {e}", dir.display())))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| StoreError::Io(format!("cannot create temp file in {}: {e}", dir.display())))?;
        temp.as_file_mut()
            .write_all(bytes)
            .map_err(|e| StoreError::Io(format!("cannot write temp file: {e}")))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| StoreError::Io(format!("cannot sync temp file: {e}")))?;

        // On failure the temp file is removed when the error drops it.
        temp.persist(&self.path).map_err(|e| {
            StoreError::Io(format!("cannot persist temp file -> {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

impl<T> SnapshotStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>, StoreError> {
        let mut last_error = StoreError::Corrupt("no read attempted".to_string());

        for attempt in 1..=self.load_attempts {
            match fs::read(&self.path) {
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    warn!(path = %self.path.display(), attempt, error = %e, "snapshot read failed");
                    last_error = StoreError::Io(e.to_string());
                }
                Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
                    Ok(value) => return Ok(Some(value)),
                    Err(e) => {
                        warn!(path = %self.path.display(), attempt, error = %e, "snapshot is not valid JSON");
                        last_error = StoreError::Corrupt(e.to_string());
                    }
                },
            }

            if attempt < self.load_attempts {
                thread::sleep(self.retry_pause);
            }
        }

        Err(last_error)
    }

    fn save(&self, value: &T) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialize(e.to_string()))?;

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write_atomic(&bytes)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot saved");
        Ok(())
    }
}
