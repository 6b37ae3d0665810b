//! The job pipeline: identity resolution, privileged operation with
//! credential rotation, then outcome classification.
//!
//! Shared by the queued worker and the single-flight runner.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use turnstile_core::{Credential, Username};

use crate::credentials::{CredentialPool, PoolError};
use crate::telemetry::RateLimitTelemetry;

pub mod collaborators;
pub mod retry;

pub use collaborators::{
    Identity, IdentityError, IdentityResolver, LogNotifier, Notifier, OperationError,
    OperationResponse, PrivilegedOperation, SuccessEvent,
};
pub use retry::AuthRetryPolicy;

/// Terminal pipeline failure. The `Display` text is what clients see as the
/// job error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("user {0} not found")]
    NotFound(String),
    #[error("identity lookup failed: {0}")]
    Lookup(String),
    #[error("credential {credential} was rejected: {message}")]
    Auth { credential: String, message: String },
    #[error("no live credentials remain; the credential pool must be replenished")]
    Exhausted,
    #[error("privileged operation failed: {message}")]
    Transient {
        credential: Option<String>,
        message: String,
    },
    #[error("privileged operation timed out after {}s", .after.as_secs())]
    Timeout { credential: String, after: Duration },
    #[error("an earlier privileged call on {credential} is still in flight")]
    Stalled { credential: String },
    #[error("expected entitlement not granted for {username} (got {})", .outcome.as_deref().unwrap_or("none"))]
    UnexpectedOutcome {
        credential: String,
        username: String,
        outcome: Option<String>,
    },
}

impl PipelineError {
    /// Credential used by the failing attempt, when one was selected.
    pub fn credential(&self) -> Option<&str> {
        match self {
            PipelineError::Auth { credential, .. }
            | PipelineError::Timeout { credential, .. }
            | PipelineError::UnexpectedOutcome { credential, .. } => Some(credential),
            PipelineError::Transient { credential, .. } => credential.as_deref(),
            PipelineError::NotFound(_)
            | PipelineError::Lookup(_)
            | PipelineError::Exhausted
            | PipelineError::Stalled { .. } => None,
        }
    }
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSuccess {
    pub identity: Identity,
    pub outcome_id: String,
    pub credential: String,
}

/// Pipeline tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Outcome identifiers that count as success.
    pub allowed_outcomes: HashSet<String>,
    /// Upper bound on one privileged call; `None` waits indefinitely.
    pub operation_timeout: Option<Duration>,
    pub retry: AuthRetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            allowed_outcomes: HashSet::new(),
            operation_timeout: Some(Duration::from_secs(30)),
            retry: AuthRetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_allowed_outcomes<I, S>(mut self, outcomes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_outcomes = outcomes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: AuthRetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

enum AttemptError {
    Operation(OperationError),
    TimedOut(Duration),
}

/// A privileged call that outlived its timeout and may still be running.
struct OutstandingCall {
    credential: String,
    username: String,
    result: Receiver<Result<OperationResponse, OperationError>>,
}

pub struct Pipeline {
    resolver: Arc<dyn IdentityResolver>,
    operation: Arc<dyn PrivilegedOperation>,
    notifier: Arc<dyn Notifier>,
    pool: Arc<CredentialPool>,
    telemetry: Arc<RateLimitTelemetry>,
    config: PipelineConfig,
    outstanding: Mutex<Option<OutstandingCall>>,
}

impl core::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        resolver: Arc<dyn IdentityResolver>,
        operation: Arc<dyn PrivilegedOperation>,
        notifier: Arc<dyn Notifier>,
        pool: Arc<CredentialPool>,
        telemetry: Arc<RateLimitTelemetry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            resolver,
            operation,
            notifier,
            pool,
            telemetry,
            config,
            outstanding: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Run the full pipeline for one username.
    pub fn run(&self, username: &Username) -> Result<PipelineSuccess, PipelineError> {
        let identity = self.resolver.resolve(username).map_err(|e| match e {
            IdentityError::NotFound(_) => PipelineError::NotFound(username.to_string()),
            IdentityError::Unavailable(msg) => PipelineError::Lookup(msg),
        })?;
        debug!(%username, identity_id = %identity.id, "identity resolved");

        let (response, credential) = self.execute_with_rotation(username, &identity)?;

        let granted = response
            .outcome_id
            .as_ref()
            .filter(|o| self.config.allowed_outcomes.contains(o.as_str()))
            .cloned();
        let Some(outcome_id) = granted else {
            return Err(PipelineError::UnexpectedOutcome {
                credential,
                username: username.to_string(),
                outcome: response.outcome_id,
            });
        };

        info!(%username, %outcome_id, %credential, "pipeline succeeded");
        self.dispatch_notification(SuccessEvent {
            username: username.to_string(),
            identity_id: identity.id.clone(),
            outcome_id: outcome_id.clone(),
            credential: credential.clone(),
            payload: response.payload,
        });

        Ok(PipelineSuccess {
            identity,
            outcome_id,
            credential,
        })
    }

    fn execute_with_rotation(
        &self,
        username: &Username,
        identity: &Identity,
    ) -> Result<(OperationResponse, String), PipelineError> {
        let policy = self.config.retry;
        let mut attempt: u32 = 0;

        self.settle_outstanding()?;

        loop {
            attempt += 1;
            let credential = self.pool.next().map_err(|e| match e {
                PoolError::Exhausted => PipelineError::Exhausted,
                other => PipelineError::Transient {
                    credential: None,
                    message: other.to_string(),
                },
            })?;

            let result = self.call(username, &identity.id, &credential);
            match &result {
                Ok(response) => self.telemetry.observe(&response.rate_limit),
                Err(AttemptError::Operation(err)) => self.telemetry.observe(err.rate_limit()),
                Err(AttemptError::TimedOut(_)) => {}
            }

            match result {
                Ok(response) => return Ok((response, credential.name)),
                Err(AttemptError::Operation(err)) if policy.is_credential_failure(&err) => {
                    self.pool.ban(&credential.name);
                    if !policy.should_retry(attempt) {
                        return Err(PipelineError::Auth {
                            credential: credential.name,
                            message: err.to_string(),
                        });
                    }
                    warn!(
                        credential = %credential.name,
                        attempt,
                        error = %err,
                        "credential rejected; retrying with the next one"
                    );
                }
                Err(AttemptError::Operation(err)) => {
                    return Err(PipelineError::Transient {
                        credential: Some(credential.name),
                        message: err.to_string(),
                    });
                }
                Err(AttemptError::TimedOut(after)) => {
                    return Err(PipelineError::Timeout {
                        credential: credential.name,
                        after,
                    });
                }
            }
        }
    }

    /// Wait for a call left running by an earlier timeout, for up to one more
    /// timeout. Its late result still feeds telemetry and bans a rejected
    /// credential. While it keeps running no new call is started.
    fn settle_outstanding(&self) -> Result<(), PipelineError> {
        let mut outstanding = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
        let Some(call) = outstanding.take() else {
            return Ok(());
        };
        let wait = self.config.operation_timeout.unwrap_or(Duration::ZERO);

        match call.result.recv_timeout(wait) {
            Ok(Ok(response)) => {
                self.telemetry.observe(&response.rate_limit);
                warn!(
                    username = %call.username,
                    credential = %call.credential,
                    outcome = ?response.outcome_id,
                    "timed-out privileged call completed late"
                );
            }
            Ok(Err(err)) => {
                self.telemetry.observe(err.rate_limit());
                if self.config.retry.is_credential_failure(&err) {
                    warn!(credential = %call.credential, error = %err, "late rejection; banning credential");
                    self.pool.ban(&call.credential);
                } else {
                    debug!(credential = %call.credential, error = %err, "timed-out privileged call failed late");
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!(credential = %call.credential, "timed-out privileged call aborted");
            }
            Err(RecvTimeoutError::Timeout) => {
                let credential = call.credential.clone();
                *outstanding = Some(call);
                return Err(PipelineError::Stalled { credential });
            }
        }
        Ok(())
    }

    fn call(
        &self,
        username: &Username,
        identity_id: &str,
        credential: &Credential,
    ) -> Result<OperationResponse, AttemptError> {
        let Some(limit) = self.config.operation_timeout else {
            return self
                .operation
                .execute(identity_id, credential)
                .map_err(AttemptError::Operation);
        };

        // The call runs on a helper thread so a hung collaborator cannot
        // stall the caller past `limit`. A timed-out call is parked in
        // `outstanding` until it returns.
        let (tx, rx) = mpsc::channel();
        let operation = self.operation.clone();
        let helper_identity = identity_id.to_string();
        let helper_credential = credential.clone();
        thread::Builder::new()
            .name("privileged-call".to_string())
            .spawn(move || {
                let _ = tx.send(operation.execute(&helper_identity, &helper_credential));
            })
            .map_err(|e| AttemptError::Operation(OperationError::transient(e.to_string())))?;

        match rx.recv_timeout(limit) {
            Ok(result) => result.map_err(AttemptError::Operation),
            Err(RecvTimeoutError::Timeout) => {
                *self.outstanding.lock().unwrap_or_else(|e| e.into_inner()) = Some(OutstandingCall {
                    credential: credential.name.clone(),
                    username: username.to_string(),
                    result: rx,
                });
                Err(AttemptError::TimedOut(limit))
            }
            Err(RecvTimeoutError::Disconnected) => Err(AttemptError::Operation(
                OperationError::transient("privileged call aborted"),
            )),
        }
    }

    fn dispatch_notification(&self, event: SuccessEvent) {
        let notifier = self.notifier.clone();
        let spawned = thread::Builder::new()
            .name("notify".to_string())
            .spawn(move || {
                if let Err(e) = notifier.notify(&event) {
                    warn!(username = %event.username, error = %e, "notification failed");
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "could not dispatch notification");
        }
    }
}
