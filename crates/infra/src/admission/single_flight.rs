//! Inline execution for deployments without a background worker.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{info, warn};

use turnstile_core::{JobResult, Username};

use super::gate::AdmissionGate;
use super::AdmissionError;
use crate::jobs::worker::panic_message;
use crate::jobs::{JobOutcome, QueueSnapshot};
use crate::ledger::ActivityLedger;
use crate::pipeline::Pipeline;
use crate::store::SnapshotStore;

/// Runs the pipeline inline under the admission gate.
///
/// Concurrent submissions beyond the first are refused with
/// [`AdmissionError::Busy`] instead of waiting.
pub struct SingleFlight {
    gate: AdmissionGate,
    pipeline: Arc<Pipeline>,
    ledger: Arc<ActivityLedger>,
    store: Arc<dyn SnapshotStore<QueueSnapshot>>,
}

impl core::fmt::Debug for SingleFlight {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("busy", &self.gate.is_busy())
            .finish_non_exhaustive()
    }
}

impl SingleFlight {
    /// Build the runner, restoring ledger state from `store`.
    pub fn open(
        pipeline: Arc<Pipeline>,
        ledger: Arc<ActivityLedger>,
        store: Arc<dyn SnapshotStore<QueueSnapshot>>,
    ) -> Self {
        match store.load() {
            Ok(Some(snapshot)) => ledger.restore(snapshot.ledger()),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to load activity state; starting empty"),
        }
        Self {
            gate: AdmissionGate::new(),
            pipeline,
            ledger,
            store,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn ledger(&self) -> &Arc<ActivityLedger> {
        &self.ledger
    }

    /// Run the pipeline for `username` now, or refuse if a run is in flight.
    pub fn submit(&self, username: &Username) -> Result<JobOutcome, AdmissionError> {
        let _permit = self.gate.try_acquire().ok_or(AdmissionError::Busy)?;
        info!(%username, "single-flight run started");

        let run = panic::catch_unwind(AssertUnwindSafe(|| self.pipeline.run(username)));
        let outcome = match run {
            Ok(Ok(success)) => {
                self.ledger.record_success(
                    username.as_str(),
                    &success.outcome_id,
                    Some(&success.credential),
                );
                JobOutcome::Completed(JobResult::success(username, success.outcome_id))
            }
            Ok(Err(err)) => {
                let message = err.to_string();
                warn!(%username, error = %message, "single-flight run failed");
                self.ledger
                    .record_error(username.as_str(), &message, err.credential());
                JobOutcome::Failed(message)
            }
            Err(payload) => {
                let message = format!("pipeline panicked: {}", panic_message(payload.as_ref()));
                warn!(%username, error = %message, "single-flight run aborted");
                self.ledger.record_error(username.as_str(), &message, None);
                JobOutcome::Failed(message)
            }
        };

        self.persist();
        Ok(outcome)
    }

    fn persist(&self) {
        let snapshot = QueueSnapshot::from_ledger(self.ledger.snapshot());
        if let Err(e) = self.store.save(&snapshot) {
            warn!(error = %e, "failed to persist activity state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    use turnstile_core::{NewCredential, SystemClock};

    use crate::credentials::CredentialPool;
    use crate::pipeline::{OperationResponse, PipelineConfig};
    use crate::store::InMemoryStore;
    use crate::telemetry::RateLimitTelemetry;
    use crate::testing::{FakeResolver, RecordingNotifier, ScriptedOperation};

    fn runner(
        store: Arc<InMemoryStore<QueueSnapshot>>,
    ) -> (Arc<SingleFlight>, Arc<ScriptedOperation>) {
        let pool = Arc::new(CredentialPool::open(Arc::new(InMemoryStore::new())));
        pool.append(vec![NewCredential {
            name: "k1".to_string(),
            token: "t".to_string(),
            transaction: "x".to_string(),
            ..Default::default()
        }])
        .unwrap();
        let operation = Arc::new(ScriptedOperation::granting("gold_monthly"));
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(FakeResolver::new()),
            operation.clone(),
            Arc::new(RecordingNotifier::new()),
            pool,
            Arc::new(RateLimitTelemetry::new(Arc::new(SystemClock))),
            PipelineConfig::default().with_allowed_outcomes(["gold_monthly"]),
        ));
        let ledger = Arc::new(ActivityLedger::new(Arc::new(SystemClock), chrono_tz::UTC));
        (Arc::new(SingleFlight::open(pipeline, ledger, store)), operation)
    }

    fn user(name: &str) -> Username {
        Username::parse(name).unwrap()
    }

    #[test]
    fn runs_inline_and_records_outcome() {
        let store = Arc::new(InMemoryStore::new());
        let (runner, operation) = runner(store.clone());

        let outcome = runner.submit(&user("alice")).unwrap();
        assert!(matches!(outcome, JobOutcome::Completed(ref r) if r.outcome_id == "gold_monthly"));

        operation.push(Ok(OperationResponse::default()));
        assert!(matches!(runner.submit(&user("bob")).unwrap(), JobOutcome::Failed(_)));
        assert!(!runner.is_busy());

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.stats.total_successes, 1);
        assert_eq!(saved.stats.total_errors, 1);
        assert!(saved.client_requests.is_empty());
    }

    #[test]
    fn concurrent_submission_is_refused() {
        let (runner, operation) = runner(Arc::new(InMemoryStore::new()));
        operation.set_delay(Duration::from_millis(300));

        let started = Arc::new(Barrier::new(2));
        let first = {
            let runner = runner.clone();
            let started = started.clone();
            std::thread::spawn(move || {
                started.wait();
                runner.submit(&user("alice"))
            })
        };
        started.wait();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !runner.is_busy() && std::time::Instant::now() < deadline {
            std::thread::yield_now();
        }

        assert_eq!(runner.submit(&user("bob")), Err(AdmissionError::Busy));
        assert!(first.join().unwrap().is_ok());
        assert!(runner.submit(&user("carol")).is_ok());
    }

    #[test]
    fn ledger_is_restored_from_store() {
        let store = Arc::new(InMemoryStore::new());
        {
            let (runner, _) = runner(store.clone());
            runner.submit(&user("alice")).unwrap();
        }
        let (runner, _) = runner(store);
        assert_eq!(runner.ledger().recent(5)[0].username, "alice");
    }
}
