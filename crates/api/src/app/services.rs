//! Service wiring: one explicitly constructed set of services per process
//! (or per test), shared with handlers through an `Extension`.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::info;

use turnstile_core::{Credential, SiteSettings, SystemClock, Username};
use turnstile_infra::{
    Admission, AdmissionMode, ActivityLedger, CredentialPool, JobQueue, Pipeline, PipelineConfig,
    RateLimitTelemetry, SettingsService, SingleFlight, SnapshotStore, TurnstileConfig,
    WorkerHandle,
    jobs::QueueSnapshot,
    pipeline::{
        Identity, IdentityError, IdentityResolver, LogNotifier, Notifier, OperationError,
        OperationResponse, PrivilegedOperation,
    },
    store::{InMemoryStore, JsonFileStore},
};

/// External collaborators the pipeline calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn IdentityResolver>,
    pub operation: Arc<dyn PrivilegedOperation>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Placeholders that fail every job until real adapters are plugged in.
    pub fn unconfigured() -> Self {
        Self {
            resolver: Arc::new(UnconfiguredResolver),
            operation: Arc::new(UnconfiguredOperation),
            notifier: Arc::new(LogNotifier),
        }
    }
}

struct UnconfiguredResolver;

impl IdentityResolver for UnconfiguredResolver {
    fn resolve(&self, _username: &Username) -> Result<Identity, IdentityError> {
        Err(IdentityError::Unavailable(
            "no identity resolver is configured for this deployment".to_string(),
        ))
    }
}

struct UnconfiguredOperation;

impl PrivilegedOperation for UnconfiguredOperation {
    fn execute(
        &self,
        _identity_id: &str,
        _credential: &Credential,
    ) -> Result<OperationResponse, OperationError> {
        Err(OperationError::transient(
            "no privileged operation is configured for this deployment",
        ))
    }
}

/// Backing stores for every persisted snapshot.
#[derive(Clone)]
pub struct Stores {
    pub state: Arc<dyn SnapshotStore<QueueSnapshot>>,
    pub credentials: Arc<dyn SnapshotStore<Vec<Credential>>>,
    pub settings: Arc<dyn SnapshotStore<SiteSettings>>,
}

impl Stores {
    /// File stores, or Redis keys when a Redis URL is configured.
    pub fn from_config(config: &TurnstileConfig) -> anyhow::Result<Self> {
        if let Some(url) = &config.redis_url {
            return Self::redis(url);
        }

        let retries = config.load_retries;
        Ok(Self {
            state: Arc::new(
                JsonFileStore::<QueueSnapshot>::new(&config.state_path).with_load_attempts(retries),
            ),
            credentials: Arc::new(
                JsonFileStore::<Vec<Credential>>::new(&config.credentials_path)
                    .with_load_attempts(retries),
            ),
            settings: Arc::new(
                JsonFileStore::<SiteSettings>::new(&config.settings_path)
                    .with_load_attempts(retries),
            ),
        })
    }

    #[cfg(feature = "redis")]
    fn redis(url: &str) -> anyhow::Result<Self> {
        use turnstile_infra::store::RedisStore;

        Ok(Self {
            state: Arc::new(RedisStore::<QueueSnapshot>::new(url, "turnstile:queue_state")?),
            credentials: Arc::new(RedisStore::<Vec<Credential>>::new(url, "turnstile:credentials")?),
            settings: Arc::new(RedisStore::<SiteSettings>::new(url, "turnstile:site_settings")?),
        })
    }

    #[cfg(not(feature = "redis"))]
    fn redis(_url: &str) -> anyhow::Result<Self> {
        anyhow::bail!("TURNSTILE_REDIS_URL is set but this build lacks the `redis` feature")
    }

    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(InMemoryStore::<QueueSnapshot>::new()),
            credentials: Arc::new(InMemoryStore::<Vec<Credential>>::new()),
            settings: Arc::new(InMemoryStore::<SiteSettings>::new()),
        }
    }
}

/// The active admission mode.
pub enum Admitter {
    Queued {
        queue: Arc<JobQueue>,
        worker: Mutex<Option<WorkerHandle>>,
    },
    SingleFlight(Arc<SingleFlight>),
}

/// Application services (explicitly constructed, no globals).
pub struct AppServices {
    pub admitter: Admitter,
    /// Also used directly by the identity preview route.
    pub resolver: Arc<dyn IdentityResolver>,
    pub admission: Admission,
    pub pool: Arc<CredentialPool>,
    pub ledger: Arc<ActivityLedger>,
    pub settings: Arc<SettingsService>,
    pub telemetry: Arc<RateLimitTelemetry>,
}

impl AppServices {
    /// Stop the background worker, if any, waiting for the current job.
    pub fn shutdown(&self) {
        if let Admitter::Queued { worker, .. } = &self.admitter {
            let handle = worker.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(handle) = handle {
                handle.shutdown();
            }
        }
    }
}

/// Wire every service for `config`. In queued mode the worker thread is
/// started here.
pub fn build_services(
    config: &TurnstileConfig,
    stores: Stores,
    collaborators: Collaborators,
) -> anyhow::Result<AppServices> {
    let clock = Arc::new(SystemClock);
    let ledger = Arc::new(ActivityLedger::new(clock.clone(), config.timezone));
    let pool = Arc::new(CredentialPool::open(stores.credentials));
    let settings = Arc::new(SettingsService::open(stores.settings));
    let telemetry = Arc::new(RateLimitTelemetry::new(clock.clone()));

    let resolver = collaborators.resolver.clone();
    let pipeline = Arc::new(Pipeline::new(
        collaborators.resolver,
        collaborators.operation,
        collaborators.notifier,
        pool.clone(),
        telemetry.clone(),
        PipelineConfig::default()
            .with_allowed_outcomes(config.allowed_outcomes.iter().cloned())
            .with_operation_timeout(config.operation_timeout),
    ));

    let admitter = match config.mode {
        AdmissionMode::Queued => {
            let queue = Arc::new(JobQueue::open(
                stores.state,
                ledger.clone(),
                clock,
                config.queue.clone(),
            ));
            let worker = queue
                .spawn_worker(pipeline)
                .context("failed to spawn worker thread")?;
            Admitter::Queued {
                queue,
                worker: Mutex::new(Some(worker)),
            }
        }
        AdmissionMode::SingleFlight => {
            Admitter::SingleFlight(Arc::new(SingleFlight::open(pipeline, ledger.clone(), stores.state)))
        }
    };

    info!(mode = ?config.mode, live_credentials = pool.live_count(), "services ready");

    Ok(AppServices {
        admitter,
        resolver,
        admission: Admission::new(settings.clone(), ledger.clone()),
        pool,
        ledger,
        settings,
        telemetry,
    })
}
