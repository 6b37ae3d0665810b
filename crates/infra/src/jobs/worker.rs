//! The single background worker.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use turnstile_core::{Job, JobResult};

use super::queue::JobQueue;
use super::types::JobOutcome;
use crate::pipeline::{Pipeline, PipelineError};

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stop after the current job and wait for the thread to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

/// Executes queued jobs one at a time through the pipeline.
#[derive(Debug, Clone)]
pub struct Worker {
    queue: Arc<JobQueue>,
    pipeline: Arc<Pipeline>,
}

impl Worker {
    pub fn new(queue: Arc<JobQueue>, pipeline: Arc<Pipeline>) -> Self {
        Self { queue, pipeline }
    }

    /// Pull and fully process at most one job, waiting up to the configured
    /// poll interval for one to arrive. Returns `true` if a job ran.
    pub fn run_once(&self) -> bool {
        let Some(job) = self.queue.claim_next(self.queue.config().poll_interval) else {
            self.queue.reap_expired();
            return false;
        };

        debug!(job_id = %job.id, username = %job.username, "processing job");
        let outcome = self.execute(&job);
        self.queue.finish(job.id, outcome);
        self.queue.reap_expired();
        true
    }

    /// Spawn the worker loop on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let name = self.queue.config().name.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || self.run(shutdown_rx))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    // A dropped handle counts as a shutdown request.
    fn run(self, shutdown_rx: mpsc::Receiver<()>) {
        let config = self.queue.config().clone();
        info!(worker = %config.name, cooldown_ms = config.cooldown.as_millis() as u64, "worker started");

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            if !self.run_once() {
                continue;
            }

            if cooldown(&shutdown_rx, config.cooldown) {
                break;
            }
        }

        info!(worker = %config.name, "worker stopped");
    }

    fn execute(&self, job: &Job) -> JobOutcome {
        let ledger = self.queue.ledger();
        let username = job.username.as_str();

        let run = panic::catch_unwind(AssertUnwindSafe(|| self.pipeline.run(&job.username)));
        match run {
            Ok(Ok(success)) => {
                ledger.record_success(username, &success.outcome_id, Some(&success.credential));
                JobOutcome::Completed(JobResult::success(&job.username, success.outcome_id))
            }
            Ok(Err(err)) => {
                if matches!(err, PipelineError::Exhausted) {
                    error!(job_id = %job.id, "credential pool exhausted");
                } else {
                    warn!(job_id = %job.id, %username, error = %err, "job failed");
                }
                let message = err.to_string();
                ledger.record_error(username, &message, err.credential());
                JobOutcome::Failed(message)
            }
            Err(payload) => {
                let message = format!("pipeline panicked: {}", panic_message(payload.as_ref()));
                error!(job_id = %job.id, %username, error = %message, "job aborted");
                ledger.record_error(username, &message, None);
                JobOutcome::Failed(message)
            }
        }
    }
}

impl JobQueue {
    /// Start the single worker for this queue.
    pub fn spawn_worker(self: &Arc<Self>, pipeline: Arc<Pipeline>) -> std::io::Result<WorkerHandle> {
        Worker::new(self.clone(), pipeline).spawn()
    }
}

/// Wait out the cooldown. Returns `true` if shutdown was requested meanwhile.
fn cooldown(shutdown_rx: &mpsc::Receiver<()>, pause: Duration) -> bool {
    match shutdown_rx.recv_timeout(pause) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use chrono::{TimeZone, Utc};
    use turnstile_core::{ManualClock, NewCredential, SystemClock, Username};

    use crate::credentials::CredentialPool;
    use crate::jobs::{ClientStatus, QueueConfig, QueueSnapshot};
    use crate::ledger::ActivityLedger;
    use crate::pipeline::{
        IdentityResolver, Identity, IdentityError, OperationResponse, PipelineConfig,
    };
    use crate::store::{InMemoryStore, SnapshotStore};
    use crate::telemetry::RateLimitTelemetry;
    use crate::testing::{FakeResolver, RecordingNotifier, ScriptedOperation};

    struct Fixture {
        queue: Arc<JobQueue>,
        worker: Worker,
        operation: Arc<ScriptedOperation>,
        store: Arc<InMemoryStore<QueueSnapshot>>,
    }

    fn fixture_with(resolver: Arc<dyn IdentityResolver>, config: QueueConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
        let store = Arc::new(InMemoryStore::new());
        let ledger = Arc::new(ActivityLedger::new(clock.clone(), chrono_tz::UTC));
        let queue = Arc::new(JobQueue::open(store.clone(), ledger, clock, config));

        let pool = Arc::new(CredentialPool::open(Arc::new(InMemoryStore::new())));
        pool.append(vec![NewCredential {
            name: "k1".to_string(),
            token: "k1-token".to_string(),
            transaction: "k1-txn".to_string(),
            ..Default::default()
        }])
        .unwrap();

        let operation = Arc::new(ScriptedOperation::granting("gold_monthly"));
        let pipeline = Arc::new(Pipeline::new(
            resolver,
            operation.clone(),
            Arc::new(RecordingNotifier::new()),
            pool,
            Arc::new(RateLimitTelemetry::new(Arc::new(SystemClock))),
            PipelineConfig::default().with_allowed_outcomes(["gold_monthly"]),
        ));

        Fixture {
            worker: Worker::new(queue.clone(), pipeline),
            queue,
            operation,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            Arc::new(FakeResolver::new()),
            QueueConfig::default().with_poll_interval(Duration::ZERO),
        )
    }

    fn user(name: &str) -> Username {
        Username::parse(name).unwrap()
    }

    #[test]
    fn alice_succeeds_then_bob_gets_unexpected_outcome() {
        let f = fixture();
        let a = f.queue.enqueue(user("alice"));
        let b = f.queue.enqueue(user("bob"));
        assert_eq!(f.queue.status(a).position, 1);
        assert_eq!(f.queue.status(b).position, 2);

        assert!(f.worker.run_once());
        let va = f.queue.status(a);
        assert_eq!(va.status, ClientStatus::Completed);
        let result = va.result.unwrap();
        assert!(result.success);
        assert!(!result.message.is_empty());

        let ledger = f.queue.ledger();
        let recent = ledger.recent(1);
        assert_eq!(recent[0].username, "alice");

        f.operation.push(Ok(OperationResponse {
            outcome_id: Some("trial".to_string()),
            ..Default::default()
        }));
        assert!(f.worker.run_once());
        let vb = f.queue.status(b);
        assert_eq!(vb.status, ClientStatus::Error);
        assert!(!vb.error.unwrap().is_empty());

        let summary = ledger.admin_summary();
        assert_eq!(summary.total_successes, 1);
        assert_eq!(summary.total_errors, 1);

        let saved = f.store.load().unwrap().unwrap();
        assert_eq!(saved.stats.total_errors, 1);
        assert_eq!(saved.processing_times.len(), 2);
    }

    #[test]
    fn idle_run_returns_false() {
        let f = fixture();
        assert!(!f.worker.run_once());
    }

    struct PanickingResolver;

    impl IdentityResolver for PanickingResolver {
        fn resolve(&self, _username: &Username) -> Result<Identity, IdentityError> {
            panic!("resolver blew up");
        }
    }

    #[test]
    fn panicking_collaborator_fails_the_job_only() {
        let f = fixture_with(
            Arc::new(PanickingResolver),
            QueueConfig::default().with_poll_interval(Duration::ZERO),
        );
        let id = f.queue.enqueue(user("alice"));
        assert!(f.worker.run_once());

        let view = f.queue.status(id);
        assert_eq!(view.status, ClientStatus::Error);
        assert!(view.error.unwrap().contains("resolver blew up"));

        f.queue.enqueue(user("bob"));
        assert!(f.worker.run_once());
    }

    #[test]
    fn spawned_worker_drains_queue_and_shuts_down_promptly() {
        let f = fixture_with(
            Arc::new(FakeResolver::new()),
            QueueConfig::default()
                .with_poll_interval(Duration::from_millis(10))
                .with_cooldown(Duration::from_millis(10)),
        );
        let ids: Vec<_> = ["a", "b", "c"].iter().map(|n| f.queue.enqueue(user(n))).collect();
        let handle = f.queue.spawn_worker(f.worker.pipeline.clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ids.iter().any(|id| f.queue.status(*id).status != ClientStatus::Completed) {
            assert!(Instant::now() < deadline, "worker did not drain the queue");
            std::thread::sleep(Duration::from_millis(10));
        }

        let calls: Vec<String> = f.operation.calls().into_iter().map(|(id, _)| id).collect();
        assert_eq!(calls, vec!["uid-a", "uid-b", "uid-c"]);
        handle.shutdown();
    }

    #[test]
    fn shutdown_interrupts_cooldown() {
        let f = fixture_with(
            Arc::new(FakeResolver::new()),
            QueueConfig::default()
                .with_poll_interval(Duration::from_millis(10))
                .with_cooldown(Duration::from_secs(60)),
        );
        let id = f.queue.enqueue(user("alice"));
        let handle = f.worker.clone().spawn().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while f.queue.status(id).status != ClientStatus::Completed {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }

        let started = Instant::now();
        handle.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn at_most_one_job_processing_under_concurrent_enqueues() {
        let f = fixture_with(
            Arc::new(FakeResolver::new()),
            QueueConfig::default()
                .with_poll_interval(Duration::from_millis(5))
                .with_cooldown(Duration::ZERO),
        );
        f.operation.set_delay(Duration::from_millis(2));
        let handle = f.worker.clone().spawn().unwrap();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = f.queue.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        queue.enqueue(user(&format!("p{p}-{i}")));
                    }
                })
            })
            .collect();

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let snapshot = f.queue.snapshot();
            let processing = snapshot
                .client_requests
                .values()
                .filter(|j| j.status == turnstile_core::JobStatus::Processing)
                .count();
            assert!(processing <= 1, "{processing} jobs processing at once");

            let done = snapshot.client_requests.len() == 40
                && snapshot.client_requests.values().all(|j| j.status.is_terminal());
            if done {
                break;
            }
            assert!(Instant::now() < deadline, "jobs did not finish");
            std::thread::sleep(Duration::from_millis(1));
        }

        for p in producers {
            p.join().unwrap();
        }
        handle.shutdown();
    }
}
