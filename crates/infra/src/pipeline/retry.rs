//! Credential retry policy.

use super::collaborators::OperationError;

/// Two-attempt policy for the privileged call.
///
/// When an attempt fails with an error the predicate classifies as a
/// credential failure, the credential is banned and the call is retried with
/// a freshly selected one, up to `max_attempts` in total. Every other error
/// is terminal.
#[derive(Debug, Clone, Copy)]
pub struct AuthRetryPolicy {
    pub max_attempts: u32,
    pub is_credential_failure: fn(&OperationError) -> bool,
}

impl Default for AuthRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            is_credential_failure: OperationError::is_credential_failure,
        }
    }
}

impl AuthRetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn is_credential_failure(&self, error: &OperationError) -> bool {
        (self.is_credential_failure)(error)
    }

    /// Whether another attempt may follow attempt number `attempt` (1-indexed).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_exactly_one_retry() {
        let policy = AuthRetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!AuthRetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn default_predicate_matches_auth_only() {
        let policy = AuthRetryPolicy::default();
        assert!(policy.is_credential_failure(&OperationError::auth("revoked")));
        assert!(!policy.is_credential_failure(&OperationError::transient("502")));
    }

    #[test]
    fn predicate_is_pluggable() {
        let policy = AuthRetryPolicy {
            is_credential_failure: |_| true,
            ..Default::default()
        };
        assert!(policy.is_credential_failure(&OperationError::transient("401")));
    }
}
