//! FIFO job queue with crash recovery.
//!
//! The job table, the pending order, the in-flight marker and the
//! processing-time window share one mutex. Every state transition is
//! followed by a synchronous snapshot write.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use turnstile_core::{Clock, Entity, Job, JobId, JobStatus, Username};

use super::types::{
    ClientStatus, GlobalStatus, JobOutcome, JobStatusView, QueueActivity, QueueConfig,
    QueueSnapshot, AVERAGE_WINDOW, DEFAULT_ESTIMATE_SECS, PROCESSING_SAMPLES_KEPT,
};
use crate::ledger::ActivityLedger;
use crate::store::SnapshotStore;

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    pending: VecDeque<JobId>,
    current: Option<JobId>,
    /// Seconds, newest last.
    processing_times: VecDeque<f64>,
}

impl QueueState {
    fn average_processing_secs(&self) -> f64 {
        let window = self.processing_times.len().min(AVERAGE_WINDOW);
        if window == 0 {
            return DEFAULT_ESTIMATE_SECS;
        }
        let sum: f64 = self.processing_times.iter().rev().take(window).sum();
        sum / window as f64
    }

    fn record_processing_time(&mut self, secs: f64) {
        self.processing_times.push_back(secs);
        while self.processing_times.len() > PROCESSING_SAMPLES_KEPT {
            self.processing_times.pop_front();
        }
    }

    /// Insert a job read back from storage. Jobs found `processing` are
    /// demoted to `waiting`; waiting jobs are re-admitted in `added_at` order.
    fn readmit(&mut self, mut recovered: Vec<Job>) -> usize {
        let mut demoted = 0;
        recovered.sort_by(|a, b| a.added_at.cmp(&b.added_at).then(a.id.cmp(&b.id)));
        for mut job in recovered.drain(..) {
            if self.jobs.contains_key(job.id()) {
                continue;
            }
            if job.demote_interrupted() {
                warn!(job_id = %job.id, username = %job.username, "interrupted job re-admitted");
                demoted += 1;
            }
            if job.status == JobStatus::Waiting {
                self.pending.push_back(job.id);
            }
            self.jobs.insert(job.id, job);
        }
        // Keep the pending order sorted by admission time across merges.
        let jobs = &self.jobs;
        self.pending
            .make_contiguous()
            .sort_by(|a, b| jobs[a].added_at.cmp(&jobs[b].added_at).then(a.cmp(b)));
        demoted
    }
}

/// The single-lane job queue.
pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    // Serializes snapshot writes so the store sees them in transition order.
    persist_lock: Mutex<()>,
    store: Arc<dyn SnapshotStore<QueueSnapshot>>,
    ledger: Arc<ActivityLedger>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl core::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.lock();
        f.debug_struct("JobQueue")
            .field("jobs", &state.jobs.len())
            .field("pending", &state.pending.len())
            .field("current", &state.current)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    /// Open the queue, recovering any persisted state.
    ///
    /// A store that cannot be read leaves the queue empty; the error is
    /// logged and the queue keeps running in memory.
    pub fn open(
        store: Arc<dyn SnapshotStore<QueueSnapshot>>,
        ledger: Arc<ActivityLedger>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        let snapshot = match store.load() {
            Ok(snapshot) => snapshot.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "failed to load queue state; starting empty");
                QueueSnapshot::default()
            }
        };

        ledger.restore(snapshot.ledger());

        let mut state = QueueState::default();
        state.processing_times = snapshot
            .processing_times
            .iter()
            .rev()
            .take(PROCESSING_SAMPLES_KEPT)
            .rev()
            .copied()
            .collect();
        let demoted = state.readmit(snapshot.client_requests.into_values().collect());

        info!(
            jobs = state.jobs.len(),
            pending = state.pending.len(),
            demoted,
            "job queue opened"
        );

        let queue = Self {
            state: Mutex::new(state),
            available: Condvar::new(),
            persist_lock: Mutex::new(()),
            store,
            ledger,
            clock,
            config,
        };
        if demoted > 0 {
            queue.persist();
        }
        queue
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<ActivityLedger> {
        &self.ledger
    }

    /// Admit a job for `username`. Never deduplicates.
    pub fn enqueue(&self, username: Username) -> JobId {
        let id = {
            let mut state = self.lock();
            // Stamped under the lock so `added_at` order matches pending order.
            let job = Job::new(username, self.clock.now());
            let id = job.id;
            debug!(job_id = %id, username = %job.username, pending = state.pending.len() + 1, "job enqueued");
            state.jobs.insert(id, job);
            state.pending.push_back(id);
            id
        };
        self.available.notify_one();
        self.persist();
        id
    }

    /// Client view of one job.
    ///
    /// An id unknown in memory triggers a reload from the store first, so
    /// ids handed out before a restart stay resolvable.
    pub fn status(&self, id: JobId) -> JobStatusView {
        if let Some(view) = self.view(id) {
            return view;
        }
        self.reload_unknown();
        self.view(id).unwrap_or_else(|| JobStatusView::not_found(id))
    }

    pub fn global_status(&self) -> GlobalStatus {
        let state = self.lock();
        let total_queue = state.pending.len() + usize::from(state.current.is_some());
        let avg = state.average_processing_secs();
        GlobalStatus {
            status: if total_queue == 0 {
                QueueActivity::Idle
            } else {
                QueueActivity::Active
            },
            total_queue,
            estimated_time: total_queue as f64 * avg,
            avg_processing_time: avg,
        }
    }

    /// Moving average over the most recent processing times, in seconds.
    pub fn average_processing_secs(&self) -> f64 {
        self.lock().average_processing_secs()
    }

    /// Current durable state.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        let ledger = self.ledger.snapshot();
        QueueSnapshot {
            client_requests: state.jobs.iter().map(|(id, job)| (*id, job.clone())).collect(),
            processing_times: state.processing_times.iter().copied().collect(),
            recent_activity: ledger.recent_activity,
            stats: ledger.stats,
        }
    }

    /// Take the oldest pending job and mark it processing, waiting up to
    /// `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout, or while another job is still in flight.
    pub fn claim_next(&self, timeout: Duration) -> Option<Job> {
        let claimed = {
            let state = self.lock();
            if state.current.is_some() {
                return None;
            }
            let (mut state, _) = self
                .available
                .wait_timeout_while(state, timeout, |s| s.pending.is_empty() && s.current.is_none())
                .unwrap_or_else(|e| e.into_inner());
            if state.current.is_some() {
                return None;
            }

            let now = self.clock.now();
            let mut claimed = None;
            while let Some(id) = state.pending.pop_front() {
                let Some(job) = state.jobs.get_mut(&id) else {
                    continue;
                };
                match job.mark_processing(now) {
                    Ok(()) => {
                        claimed = Some(job.clone());
                        state.current = Some(id);
                        break;
                    }
                    Err(e) => warn!(job_id = %id, error = %e, "skipping unclaimable job"),
                }
            }
            claimed
        }?;

        debug!(job_id = %claimed.id, username = %claimed.username, "job claimed");
        self.persist();
        Some(claimed)
    }

    /// Record the terminal outcome of the in-flight job.
    pub fn finish(&self, id: JobId, outcome: JobOutcome) -> Option<Job> {
        let finished = {
            let mut state = self.lock();
            if state.current == Some(id) {
                state.current = None;
            }
            let now = self.clock.now();
            let job = state.jobs.get_mut(&id)?;
            let marked = match outcome {
                JobOutcome::Completed(result) => job.mark_completed(result, now),
                JobOutcome::Failed(error) => job.mark_failed(error, now),
            };
            if let Err(e) = marked {
                warn!(job_id = %id, error = %e, "could not record job outcome");
                return None;
            }
            let job = job.clone();
            if let Some(elapsed) = job.processing_duration() {
                state.record_processing_time(elapsed.num_milliseconds() as f64 / 1000.0);
            }
            job
        };

        info!(
            job_id = %finished.id,
            username = %finished.username,
            status = %finished.status,
            "job finished"
        );
        self.persist();
        Some(finished)
    }

    /// Delete terminal jobs older than the retention window.
    pub fn reap_expired(&self) -> usize {
        let removed = {
            let mut state = self.lock();
            let now = self.clock.now();
            let retention = chrono::Duration::from_std(self.config.retention)
                .unwrap_or(chrono::Duration::MAX);
            let before = state.jobs.len();
            state.jobs.retain(|_, job| !job.is_expired(now, retention));
            before - state.jobs.len()
        };
        if removed > 0 {
            debug!(removed, "expired jobs reaped");
            self.persist();
        }
        removed
    }

    /// Write the current state through to the store. Failures are logged.
    pub fn persist(&self) {
        let _writer = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save(&snapshot) {
            warn!(error = %e, "failed to persist queue state");
        }
    }

    fn view(&self, id: JobId) -> Option<JobStatusView> {
        let state = self.lock();
        let job = state.jobs.get(&id)?;

        let position = match job.status {
            JobStatus::Waiting => state
                .pending
                .iter()
                .position(|p| *p == id)
                .map_or(0, |idx| idx + 1),
            _ => 0,
        };
        let in_flight_elsewhere = state.current.is_some_and(|c| c != id);
        let total_queue = state.pending.len() + usize::from(in_flight_elsewhere);

        Some(JobStatusView {
            client_id: id,
            status: ClientStatus::from(job.status),
            position,
            total_queue,
            estimated_time: position as f64 * state.average_processing_secs(),
            result: job.result.clone(),
            error: job.error.clone(),
        })
    }

    fn reload_unknown(&self) {
        let snapshot = match self.store.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "status reload failed");
                return;
            }
        };

        let mut state = self.lock();
        let known = state.jobs.len();
        let unknown: Vec<Job> = snapshot
            .client_requests
            .into_values()
            .filter(|job| !state.jobs.contains_key(&job.id))
            // The job in flight here is never re-admitted from disk.
            .filter(|job| state.current != Some(job.id))
            .collect();
        state.readmit(unknown);
        let added = state.jobs.len() - known;
        let has_pending = !state.pending.is_empty();
        drop(state);

        if added > 0 {
            debug!(added, "jobs recovered on status lookup");
            if has_pending {
                self.available.notify_one();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
