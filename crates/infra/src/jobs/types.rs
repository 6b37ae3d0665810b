//! Queue configuration, persisted snapshot and client-facing views.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use turnstile_core::{ActivityEntry, Job, JobId, JobResult, JobStatus};

use crate::ledger::{LedgerSnapshot, LedgerStats};

/// Processing-time samples kept for the moving average.
pub const PROCESSING_SAMPLES_KEPT: usize = 20;

/// Samples the moving average is computed over.
pub const AVERAGE_WINDOW: usize = 10;

/// Per-job estimate used before any job has completed.
pub const DEFAULT_ESTIMATE_SECS: f64 = 5.0;

/// Queue and worker tunables.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Pause after every job, success or failure.
    pub cooldown: Duration,
    /// How long one blocking pull waits for work before yielding.
    pub poll_interval: Duration,
    /// How long terminal jobs stay visible before the reaper deletes them.
    pub retention: Duration,
    /// Worker thread name, also used in logs.
    pub name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            retention: Duration::from_secs(600),
            name: "turnstile-worker".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Durable state: the job table, the processing-time window and the
/// activity ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub client_requests: BTreeMap<JobId, Job>,
    /// Seconds, newest last.
    #[serde(default)]
    pub processing_times: Vec<f64>,
    /// Newest first.
    #[serde(default)]
    pub recent_activity: Vec<ActivityEntry>,
    #[serde(default)]
    pub stats: LedgerStats,
}

impl QueueSnapshot {
    /// Snapshot carrying only ledger state, as written in single-flight mode.
    pub fn from_ledger(ledger: LedgerSnapshot) -> Self {
        Self {
            recent_activity: ledger.recent_activity,
            stats: ledger.stats,
            ..Default::default()
        }
    }

    pub fn ledger(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            recent_activity: self.recent_activity.clone(),
            stats: self.stats.clone(),
        }
    }
}

/// Terminal outcome handed back to the queue by the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(JobResult),
    Failed(String),
}

/// Status as reported to polling clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Waiting,
    Processing,
    Completed,
    Error,
    NotFound,
}

impl From<JobStatus> for ClientStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Waiting => ClientStatus::Waiting,
            JobStatus::Processing => ClientStatus::Processing,
            JobStatus::Completed => ClientStatus::Completed,
            JobStatus::Error => ClientStatus::Error,
        }
    }
}

/// Per-job view returned by `JobQueue::status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub client_id: JobId,
    pub status: ClientStatus,
    /// 1-based rank among pending jobs; 0 once processing or terminal.
    pub position: usize,
    pub total_queue: usize,
    /// Seconds.
    pub estimated_time: f64,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

impl JobStatusView {
    pub fn not_found(client_id: JobId) -> Self {
        Self {
            client_id,
            status: ClientStatus::NotFound,
            position: 0,
            total_queue: 0,
            estimated_time: 0.0,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueActivity {
    Idle,
    Active,
}

/// Aggregate view returned by `JobQueue::global_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalStatus {
    pub status: QueueActivity,
    /// Pending jobs plus the one in flight.
    pub total_queue: usize,
    /// Seconds until the queue drains at the current average.
    pub estimated_time: f64,
    pub avg_processing_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_pacing_constants() {
        let config = QueueConfig::default();
        assert_eq!(config.cooldown, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.retention, Duration::from_secs(600));
    }

    #[test]
    fn snapshot_tolerates_missing_sections() {
        let snapshot: QueueSnapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(snapshot, QueueSnapshot::default());
    }

    #[test]
    fn not_found_serializes_snake_case() {
        let view = JobStatusView::not_found(JobId::new());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "not_found");
        assert_eq!(json["position"], 0);
    }
}
