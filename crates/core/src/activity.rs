//! Recent-activity feed entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome recorded in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityKind {
    Success { outcome_id: String },
    Error { message: String },
}

/// One entry of the recent-activity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub username: String,
    #[serde(flatten)]
    pub kind: ActivityKind,
    /// Credential used for the attempt, when one was selected.
    pub credential: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn is_success(&self) -> bool {
        matches!(self.kind, ActivityKind::Success { .. })
    }
}
