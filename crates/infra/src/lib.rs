//! Services for the single-lane job pipeline: durable snapshot stores,
//! credential rotation, the job pipeline, queued and single-flight admission,
//! the activity ledger and process configuration.

pub mod admission;
pub mod config;
pub mod credentials;
pub mod jobs;
pub mod ledger;
pub mod pipeline;
pub mod settings;
pub mod store;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use admission::{Admission, AdmissionError, AdmissionGate, SingleFlight};
pub use config::{AdmissionMode, ConfigError, TurnstileConfig};
pub use credentials::{CredentialPool, PoolError};
pub use jobs::{JobQueue, QueueConfig, QueueSnapshot, Worker, WorkerHandle};
pub use ledger::{ActivityLedger, AdminSummary};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError};
pub use settings::SettingsService;
pub use store::{SnapshotStore, StoreError};
pub use telemetry::{RateLimitInfo, RateLimitTelemetry};
