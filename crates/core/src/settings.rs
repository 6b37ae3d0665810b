//! Site-wide operator settings.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

const MAX_ANNOUNCEMENT_LEN: usize = 1000;

/// Operator-controlled switches consulted at admission time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSettings {
    /// Reject all submissions while set.
    #[serde(default)]
    pub maintenance_mode: bool,
    /// Successful outcomes allowed per calendar day (0 = unlimited).
    #[serde(default)]
    pub max_daily_successes: u64,
    /// Free text shown to clients.
    #[serde(default)]
    pub announcement: String,
}

impl SiteSettings {
    /// Whether `today_successes` has used up the daily quota.
    pub fn quota_reached(&self, today_successes: u64) -> bool {
        self.max_daily_successes > 0 && today_successes >= self.max_daily_successes
    }

    /// Apply a partial update, validating the result.
    pub fn apply(&self, patch: SettingsPatch) -> DomainResult<Self> {
        let mut next = self.clone();
        if let Some(maintenance_mode) = patch.maintenance_mode {
            next.maintenance_mode = maintenance_mode;
        }
        if let Some(max) = patch.max_daily_successes {
            next.max_daily_successes = max;
        }
        if let Some(announcement) = patch.announcement {
            if announcement.chars().count() > MAX_ANNOUNCEMENT_LEN {
                return Err(DomainError::validation(format!(
                    "announcement must be at most {MAX_ANNOUNCEMENT_LEN} characters"
                )));
            }
            next.announcement = announcement;
        }
        Ok(next)
    }
}

/// Partial settings update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub maintenance_mode: Option<bool>,
    pub max_daily_successes: Option<u64>,
    pub announcement: Option<String>,
}
