//! In-process collaborator fakes for tests and local runs.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use turnstile_core::{Credential, Username};

use crate::pipeline::{
    Identity, IdentityError, IdentityResolver, Notifier, OperationError, OperationResponse,
    PrivilegedOperation, SuccessEvent,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Resolves every username to `uid-<username>` except those marked missing.
#[derive(Debug, Default)]
pub struct FakeResolver {
    missing: HashSet<String>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing(mut self, username: &str) -> Self {
        self.missing.insert(username.to_string());
        self
    }
}

impl IdentityResolver for FakeResolver {
    fn resolve(&self, username: &Username) -> Result<Identity, IdentityError> {
        if self.missing.contains(username.as_str()) {
            return Err(IdentityError::NotFound(username.to_string()));
        }
        Ok(Identity {
            id: format!("uid-{username}"),
            display_name: username.to_string(),
            avatar_url: None,
        })
    }
}

/// Privileged operation that replays queued results, then falls back to
/// granting a fixed outcome.
#[derive(Debug)]
pub struct ScriptedOperation {
    fallback: String,
    script: Mutex<VecDeque<Result<OperationResponse, OperationError>>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Mutex<Duration>,
}

impl ScriptedOperation {
    pub fn granting(outcome_id: impl Into<String>) -> Self {
        Self {
            fallback: outcome_id.into(),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Queue the result of the next unscripted call.
    pub fn push(&self, result: Result<OperationResponse, OperationError>) {
        lock(&self.script).push_back(result);
    }

    /// Sleep this long inside every call.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// `(identity_id, credential_name)` per call, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }
}

impl PrivilegedOperation for ScriptedOperation {
    fn execute(
        &self,
        identity_id: &str,
        credential: &Credential,
    ) -> Result<OperationResponse, OperationError> {
        lock(&self.calls).push((identity_id.to_string(), credential.name.clone()));

        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        lock(&self.script).pop_front().unwrap_or_else(|| {
            Ok(OperationResponse {
                outcome_id: Some(self.fallback.clone()),
                payload: serde_json::json!({ "granted": self.fallback }),
                ..Default::default()
            })
        })
    }
}

/// Notifier that records events and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<SuccessEvent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<SuccessEvent> {
        lock(&self.events).clone()
    }

    /// Poll until at least `count` events arrived or two seconds passed.
    /// Notifications are delivered on a detached thread.
    pub fn wait_for(&self, count: usize) -> Vec<SuccessEvent> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let events = self.events();
            if events.len() >= count || Instant::now() >= deadline {
                return events;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &SuccessEvent) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("notification sink unavailable");
        }
        lock(&self.events).push(event.clone());
        Ok(())
    }
}
