//! Rate-limit telemetry reported by the privileged collaborator.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use turnstile_core::Clock;

/// Raw rate-limit header values from one response. Any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub remaining: Option<String>,
    pub limit: Option<String>,
    pub reset: Option<String>,
}

impl RateLimitHeaders {
    /// Pick the rate-limit headers out of `(name, value)` pairs,
    /// case-insensitively.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut headers = Self::default();
        for (name, value) in pairs {
            let slot = match name.to_ascii_lowercase().as_str() {
                "x-ratelimit-remaining" => &mut headers.remaining,
                "x-ratelimit-limit" => &mut headers.limit,
                "x-ratelimit-reset" => &mut headers.reset,
                _ => continue,
            };
            *slot = Some(value.trim().to_string());
        }
        headers
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_none() && self.limit.is_none() && self.reset.is_none()
    }
}

/// Last known rate-limit state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub remaining: Option<i64>,
    pub limit: Option<i64>,
    pub reset: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Best-effort tracker: a missing or unparsable header leaves the previous
/// value untouched.
pub struct RateLimitTelemetry {
    info: Mutex<RateLimitInfo>,
    clock: Arc<dyn Clock>,
}

impl core::fmt::Debug for RateLimitTelemetry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RateLimitTelemetry")
            .field("info", &self.current())
            .finish()
    }
}

impl RateLimitTelemetry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            info: Mutex::new(RateLimitInfo::default()),
            clock,
        }
    }

    pub fn observe(&self, headers: &RateLimitHeaders) {
        if headers.is_empty() {
            return;
        }

        let mut info = self.info.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(remaining) = headers.remaining.as_deref().and_then(|v| v.parse().ok()) {
            info.remaining = Some(remaining);
        }
        if let Some(limit) = headers.limit.as_deref().and_then(|v| v.parse().ok()) {
            info.limit = Some(limit);
        }
        if let Some(reset) = &headers.reset {
            info.reset = Some(reset.clone());
        }
        info.last_updated = Some(self.clock.now());
    }

    pub fn current(&self) -> RateLimitInfo {
        self.info.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::SystemClock;

    #[test]
    fn parses_headers_case_insensitively() {
        let headers = RateLimitHeaders::from_pairs([
            ("X-RateLimit-Remaining", "41"),
            ("x-ratelimit-limit", " 50 "),
            ("content-type", "application/json"),
        ]);
        assert_eq!(headers.remaining.as_deref(), Some("41"));
        assert_eq!(headers.limit.as_deref(), Some("50"));
        assert!(headers.reset.is_none());
    }

    #[test]
    fn missing_headers_keep_prior_values() {
        let telemetry = RateLimitTelemetry::new(Arc::new(SystemClock));
        telemetry.observe(&RateLimitHeaders {
            remaining: Some("10".into()),
            limit: Some("50".into()),
            reset: Some("1700000000".into()),
        });
        telemetry.observe(&RateLimitHeaders {
            remaining: Some("9".into()),
            limit: Some("garbage".into()),
            reset: None,
        });

        let info = telemetry.current();
        assert_eq!(info.remaining, Some(9));
        assert_eq!(info.limit, Some(50));
        assert_eq!(info.reset.as_deref(), Some("1700000000"));
        assert!(info.last_updated.is_some());
    }

    #[test]
    fn empty_observation_changes_nothing() {
        let telemetry = RateLimitTelemetry::new(Arc::new(SystemClock));
        telemetry.observe(&RateLimitHeaders::default());
        assert_eq!(telemetry.current(), RateLimitInfo::default());
    }
}
