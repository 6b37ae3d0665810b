use serde::{Deserialize, Serialize};

use turnstile_core::{JobId, JobResult, NewCredential};
use turnstile_infra::jobs::{ClientStatus, JobStatusView};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct UserInfoRequest {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub client_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

/// Admin credential upload: a single entry or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CredentialsUpload {
    Many(Vec<NewCredential>),
    One(NewCredential),
}

impl CredentialsUpload {
    pub fn into_vec(self) -> Vec<NewCredential> {
        match self {
            CredentialsUpload::Many(list) => list,
            CredentialsUpload::One(one) => vec![one],
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

/// Identity preview shown before a submission.
#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Queued-mode submission receipt.
#[derive(Debug, Serialize)]
pub struct QueuedReceipt {
    pub success: bool,
    pub client_id: JobId,
    pub position: usize,
    pub total_queue: usize,
    pub estimated_time: f64,
}

impl From<JobStatusView> for QueuedReceipt {
    fn from(view: JobStatusView) -> Self {
        Self {
            success: true,
            client_id: view.client_id,
            position: view.position,
            total_queue: view.total_queue,
            estimated_time: view.estimated_time,
        }
    }
}

/// Single-flight result, returned once the inline run is over.
#[derive(Debug, Serialize)]
pub struct InlineResult {
    pub status: ClientStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
