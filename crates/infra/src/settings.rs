//! Persisted site settings.

use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use turnstile_core::{DomainResult, SettingsPatch, SiteSettings};

use crate::store::SnapshotStore;

/// Current site settings, written through to a store on every update.
pub struct SettingsService {
    current: RwLock<SiteSettings>,
    store: Arc<dyn SnapshotStore<SiteSettings>>,
}

impl core::fmt::Debug for SettingsService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SettingsService")
            .field("current", &self.get())
            .finish_non_exhaustive()
    }
}

impl SettingsService {
    /// Load settings, falling back to defaults when the store is empty or
    /// unreadable.
    pub fn open(store: Arc<dyn SnapshotStore<SiteSettings>>) -> Self {
        let current = match store.load() {
            Ok(settings) => settings.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "failed to load site settings; using defaults");
                SiteSettings::default()
            }
        };
        Self {
            current: RwLock::new(current),
            store,
        }
    }

    pub fn get(&self) -> SiteSettings {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Apply a partial update. Invalid patches leave settings untouched.
    pub fn update(&self, patch: SettingsPatch) -> DomainResult<SiteSettings> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let next = current.apply(patch)?;
        *current = next.clone();
        if let Err(e) = self.store.save(&next) {
            warn!(error = %e, "failed to persist site settings");
        }
        info!(
            maintenance_mode = next.maintenance_mode,
            max_daily_successes = next.max_daily_successes,
            "site settings updated"
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn update_persists_and_survives_reopen() {
        let store = Arc::new(InMemoryStore::new());
        let service = SettingsService::open(store.clone());
        service
            .update(SettingsPatch {
                maintenance_mode: Some(true),
                announcement: Some("back soon".to_string()),
                ..Default::default()
            })
            .unwrap();

        let reopened = SettingsService::open(store);
        let settings = reopened.get();
        assert!(settings.maintenance_mode);
        assert_eq!(settings.announcement, "back soon");
        assert_eq!(settings.max_daily_successes, 0);
    }

    #[test]
    fn invalid_patch_is_rejected_without_side_effects() {
        let store = Arc::new(InMemoryStore::new());
        let service = SettingsService::open(store.clone());
        let err = service.update(SettingsPatch {
            announcement: Some("x".repeat(5000)),
            ..Default::default()
        });
        assert!(err.is_err());
        assert_eq!(service.get(), SiteSettings::default());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn previously_saved_settings_are_loaded_on_open() {
        let seeded = SiteSettings {
            maintenance_mode: true,
            max_daily_successes: 25,
            announcement: "closed for the night".to_string(),
        };
        let service = SettingsService::open(Arc::new(InMemoryStore::with_value(seeded.clone())));
        assert_eq!(service.get(), seeded);

        let patched = service
            .update(SettingsPatch {
                maintenance_mode: Some(false),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(patched.max_daily_successes, 25);
        assert_eq!(patched.announcement, "closed for the night");
    }
}
