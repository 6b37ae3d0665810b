//! External collaborators consumed by the pipeline.
//!
//! Identity resolution, the privileged operation itself and notification
//! delivery are supplied by the embedding deployment.

use serde::Serialize;
use tracing::info;

use turnstile_core::{Credential, Username};

use crate::telemetry::RateLimitHeaders;

/// External identity behind a username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// The username does not resolve to an identity.
    #[error("identity not found: {0}")]
    NotFound(String),
    /// The lookup itself failed (network, unexpected response).
    #[error("identity lookup failed: {0}")]
    Unavailable(String),
}

pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, username: &Username) -> Result<Identity, IdentityError>;
}

/// Successful response of the privileged operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationResponse {
    /// Entitlement the operation reports as granted, if any.
    pub outcome_id: Option<String>,
    /// Raw response body, passed to notifications.
    pub payload: serde_json::Value,
    pub rate_limit: RateLimitHeaders,
}

/// Failed response of the privileged operation. Rate-limit headers are
/// carried on failures too, since rejected and throttled responses report
/// them as well.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// The credential used was rejected (revoked, invalid).
    #[error("credential rejected: {message}")]
    Auth {
        message: String,
        rate_limit: RateLimitHeaders,
    },
    /// Any other failure (non-success status, network error).
    #[error("{message}")]
    Transient {
        message: String,
        rate_limit: RateLimitHeaders,
    },
}

impl OperationError {
    pub fn auth(message: impl Into<String>) -> Self {
        OperationError::Auth {
            message: message.into(),
            rate_limit: RateLimitHeaders::default(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        OperationError::Transient {
            message: message.into(),
            rate_limit: RateLimitHeaders::default(),
        }
    }

    /// Attach the rate-limit headers of the failed response.
    pub fn with_rate_limit(mut self, headers: RateLimitHeaders) -> Self {
        match &mut self {
            OperationError::Auth { rate_limit, .. }
            | OperationError::Transient { rate_limit, .. } => *rate_limit = headers,
        }
        self
    }

    pub fn rate_limit(&self) -> &RateLimitHeaders {
        match self {
            OperationError::Auth { rate_limit, .. }
            | OperationError::Transient { rate_limit, .. } => rate_limit,
        }
    }

    /// Default credential-failure predicate.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, OperationError::Auth { .. })
    }
}

pub trait PrivilegedOperation: Send + Sync {
    fn execute(&self, identity_id: &str, credential: &Credential)
    -> Result<OperationResponse, OperationError>;
}

/// Emitted after a job reaches the expected outcome.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessEvent {
    pub username: String,
    pub identity_id: String,
    pub outcome_id: String,
    pub credential: String,
    pub payload: serde_json::Value,
}

/// Fire-and-forget notification sink. Errors are logged by the caller and
/// never affect the job.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &SuccessEvent) -> anyhow::Result<()>;
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &SuccessEvent) -> anyhow::Result<()> {
        info!(
            username = %event.username,
            identity_id = %event.identity_id,
            outcome_id = %event.outcome_id,
            credential = %event.credential,
            "outcome granted"
        );
        Ok(())
    }
}
