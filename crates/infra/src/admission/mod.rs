//! Single-flight admission and site-wide admission policy.

use std::sync::Arc;

use turnstile_core::DomainError;

use crate::ledger::ActivityLedger;
use crate::settings::SettingsService;

pub mod gate;
pub mod single_flight;

pub use gate::{AdmissionGate, GatePermit};
pub use single_flight::SingleFlight;

/// Reasons a submission is refused before any work starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("another request is already being processed; try again shortly")]
    Busy,
    #[error("service is under maintenance")]
    Maintenance,
    #[error("daily limit of {limit} reached; try again tomorrow")]
    QuotaReached { limit: u64 },
    #[error(transparent)]
    Validation(#[from] DomainError),
}

/// Site-wide admission checks shared by both admission modes.
#[derive(Debug, Clone)]
pub struct Admission {
    settings: Arc<SettingsService>,
    ledger: Arc<ActivityLedger>,
}

impl Admission {
    pub fn new(settings: Arc<SettingsService>, ledger: Arc<ActivityLedger>) -> Self {
        Self { settings, ledger }
    }

    /// Refuse new work during maintenance or once today's quota is used up.
    pub fn check(&self) -> Result<(), AdmissionError> {
        let settings = self.settings.get();
        if settings.maintenance_mode {
            return Err(AdmissionError::Maintenance);
        }
        if settings.quota_reached(self.ledger.today_successes()) {
            return Err(AdmissionError::QuotaReached {
                limit: settings.max_daily_successes,
            });
        }
        Ok(())
    }
}
