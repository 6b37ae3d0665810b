//! Process configuration read from `TURNSTILE_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

use crate::jobs::QueueConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// How submissions are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionMode {
    /// Admit-and-wait: a FIFO queue drained by one background worker.
    #[default]
    Queued,
    /// Run inline, refusing concurrent submissions.
    SingleFlight,
}

impl FromStr for AdmissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" | "queue" => Ok(AdmissionMode::Queued),
            "single_flight" | "single-flight" => Ok(AdmissionMode::SingleFlight),
            other => Err(format!("expected `queued` or `single_flight`, got `{other}`")),
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct TurnstileConfig {
    pub bind: SocketAddr,
    pub mode: AdmissionMode,
    pub state_path: PathBuf,
    pub credentials_path: PathBuf,
    pub settings_path: PathBuf,
    /// When set, all snapshots live in Redis instead of files.
    pub redis_url: Option<String>,
    pub allowed_outcomes: Vec<String>,
    pub queue: QueueConfig,
    /// `None` disables the bound on the privileged call.
    pub operation_timeout: Option<Duration>,
    /// Timezone used to bucket daily counters.
    pub timezone: Tz,
    /// Attempts at reading a corrupt snapshot file before giving up.
    pub load_retries: u32,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            mode: AdmissionMode::Queued,
            state_path: PathBuf::from("queue_state.json"),
            credentials_path: PathBuf::from("credentials.json"),
            settings_path: PathBuf::from("site_settings.json"),
            redis_url: None,
            allowed_outcomes: Vec::new(),
            queue: QueueConfig::default(),
            operation_timeout: Some(Duration::from_secs(30)),
            timezone: Tz::UTC,
            load_retries: 3,
        }
    }
}

impl TurnstileConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; unset or blank keys keep their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("TURNSTILE_BIND") {
            config.bind = parse("TURNSTILE_BIND", &v)?;
        }
        if let Some(v) = get("TURNSTILE_MODE") {
            config.mode = parse("TURNSTILE_MODE", &v)?;
        }
        if let Some(v) = get("TURNSTILE_STATE_PATH") {
            config.state_path = PathBuf::from(v);
        }
        if let Some(v) = get("TURNSTILE_CREDENTIALS_PATH") {
            config.credentials_path = PathBuf::from(v);
        }
        if let Some(v) = get("TURNSTILE_SETTINGS_PATH") {
            config.settings_path = PathBuf::from(v);
        }
        config.redis_url = get("TURNSTILE_REDIS_URL");
        if let Some(v) = get("TURNSTILE_ALLOWED_OUTCOMES") {
            config.allowed_outcomes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("TURNSTILE_COOLDOWN_SECS") {
            let secs: u64 = parse("TURNSTILE_COOLDOWN_SECS", &v)?;
            config.queue.cooldown = Duration::from_secs(secs);
        }
        if let Some(v) = get("TURNSTILE_POLL_MILLIS") {
            let millis: u64 = parse("TURNSTILE_POLL_MILLIS", &v)?;
            config.queue.poll_interval = Duration::from_millis(millis);
        }
        if let Some(v) = get("TURNSTILE_RETENTION_SECS") {
            let secs: u64 = parse("TURNSTILE_RETENTION_SECS", &v)?;
            config.queue.retention = Duration::from_secs(secs);
        }
        if let Some(v) = get("TURNSTILE_OPERATION_TIMEOUT_SECS") {
            let secs: u64 = parse("TURNSTILE_OPERATION_TIMEOUT_SECS", &v)?;
            config.operation_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(v) = get("TURNSTILE_TIMEZONE") {
            config.timezone = parse("TURNSTILE_TIMEZONE", &v)?;
        }
        if let Some(v) = get("TURNSTILE_LOAD_RETRIES") {
            config.load_retries = parse("TURNSTILE_LOAD_RETRIES", &v)?;
        }

        Ok(config)
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<TurnstileConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TurnstileConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from(&[]).unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.mode, AdmissionMode::Queued);
        assert_eq!(config.queue.cooldown, Duration::from_secs(5));
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.timezone, Tz::UTC);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = from(&[
            ("TURNSTILE_MODE", "single_flight"),
            ("TURNSTILE_ALLOWED_OUTCOMES", "gold_monthly, gold_yearly,,"),
            ("TURNSTILE_COOLDOWN_SECS", "2"),
            ("TURNSTILE_OPERATION_TIMEOUT_SECS", "0"),
            ("TURNSTILE_TIMEZONE", "Asia/Tokyo"),
            ("TURNSTILE_BIND", "127.0.0.1:9000"),
        ])
        .unwrap();

        assert_eq!(config.mode, AdmissionMode::SingleFlight);
        assert_eq!(config.allowed_outcomes, vec!["gold_monthly", "gold_yearly"]);
        assert_eq!(config.queue.cooldown, Duration::from_secs(2));
        assert_eq!(config.operation_timeout, None);
        assert_eq!(config.timezone, chrono_tz::Asia::Tokyo);
        assert_eq!(config.bind.port(), 9000);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = from(&[("TURNSTILE_COOLDOWN_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TURNSTILE_COOLDOWN_SECS", .. }));

        assert!(from(&[("TURNSTILE_TIMEZONE", "Mars/Olympus")]).is_err());
        assert!(from(&[("TURNSTILE_MODE", "parallel")]).is_err());
    }
}
