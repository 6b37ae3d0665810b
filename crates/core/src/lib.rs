//! `turnstile-core` — domain building blocks for the single-lane job pipeline.
//!
//! This crate contains **pure domain** types (no I/O, no threads). Services that
//! sequence jobs, rotate credentials and persist state live in `turnstile-infra`.

pub mod activity;
pub mod clock;
pub mod credential;
pub mod entity;
pub mod error;
pub mod id;
pub mod job;
pub mod settings;
pub mod value_object;

pub use activity::{ActivityEntry, ActivityKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{Credential, CredentialView, NewCredential};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{Job, JobResult, JobStatus};
pub use settings::{SettingsPatch, SiteSettings};
pub use value_object::{MAX_USERNAME_LEN, Username};
