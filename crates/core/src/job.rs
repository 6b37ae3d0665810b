//! Job model and its status lifecycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::JobId;
use crate::value_object::Username;

/// Job execution status.
///
/// Transitions only move forward: `waiting -> processing -> completed|error`.
/// The single exception is crash recovery, see [`Job::demote_interrupted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted, waiting for the worker
    Waiting,
    /// Currently held by the worker
    Processing,
    /// Finished with the expected outcome
    Completed,
    /// Finished with a failure
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Success payload of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    #[serde(rename = "msg")]
    pub message: String,
    pub outcome_id: String,
}

impl JobResult {
    pub fn success(username: &Username, outcome_id: impl Into<String>) -> Self {
        let outcome_id = outcome_id.into();
        Self {
            success: true,
            message: format!("{outcome_id} granted to {username} successfully"),
            outcome_id,
        }
    }
}

/// One admitted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub username: Username,
    pub status: JobStatus,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    /// Admission time; the FIFO ordering key. Never changes.
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a waiting job admitted at `now`.
    pub fn new(username: Username, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            username,
            status: JobStatus::Waiting,
            result: None,
            error: None,
            added_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Mark the job as picked up by the worker.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect_status(JobStatus::Waiting, JobStatus::Processing)?;
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        Ok(())
    }

    /// Mark the job as completed with its success payload.
    pub fn mark_completed(&mut self, result: JobResult, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect_status(JobStatus::Processing, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(now);
        Ok(())
    }

    /// Mark the job as failed.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect_status(JobStatus::Processing, JobStatus::Error)?;
        self.status = JobStatus::Error;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// Crash recovery: a job persisted as `processing` was interrupted by a
    /// previous process and goes back to `waiting` with `started_at` cleared.
    ///
    /// Returns `true` if the job was demoted.
    pub fn demote_interrupted(&mut self) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Waiting;
        self.started_at = None;
        true
    }

    /// Wall time spent processing, once the job is terminal.
    pub fn processing_duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).max(Duration::zero())),
            _ => None,
        }
    }

    /// Terminal for longer than `retention` as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        if !self.status.is_terminal() {
            return false;
        }
        match self.completed_at {
            Some(done) => now - done > retention,
            None => false,
        }
    }

    fn expect_status(&self, expected: JobStatus, next: JobStatus) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::invariant(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        Ok(())
    }
}

impl Entity for Job {
    type Id = JobId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
