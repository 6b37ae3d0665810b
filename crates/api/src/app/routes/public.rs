//! Client-facing routes: submission, status polling, activity feed.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use turnstile_core::{JobId, Username};
use turnstile_infra::jobs::{
    ClientStatus, GlobalStatus, JobOutcome, QueueActivity, types::DEFAULT_ESTIMATE_SECS,
};
use turnstile_infra::ledger::RECENT_CAPACITY;
use turnstile_infra::pipeline::IdentityError;
use turnstile_infra::AdmissionError;

use crate::app::dto;
use crate::app::errors;
use crate::app::services::{Admitter, AppServices};

const DEFAULT_ACTIVITY_LIMIT: usize = 10;

/// POST /api/user-info
///
/// Resolves a username without admitting a job, so clients can confirm the
/// account first.
pub async fn user_info(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::UserInfoRequest>,
) -> axum::response::Response {
    let username = match Username::parse(&body.username) {
        Ok(u) => u,
        Err(e) => return errors::admission_error_to_response(AdmissionError::Validation(e)),
    };

    let resolver = services.resolver.clone();
    let lookup = username.clone();
    match tokio::task::spawn_blocking(move || resolver.resolve(&lookup)).await {
        Ok(Ok(identity)) => Json(json!({
            "success": true,
            "data": dto::UserInfo {
                id: identity.id,
                username: username.to_string(),
                display_name: identity.display_name,
                avatar_url: identity.avatar_url,
            },
        }))
        .into_response(),
        Ok(Err(IdentityError::NotFound(_))) => errors::json_error(
            StatusCode::NOT_FOUND,
            "user_not_found",
            format!("user {username} not found"),
        ),
        Ok(Err(e @ IdentityError::Unavailable(_))) => {
            errors::json_error(StatusCode::BAD_GATEWAY, "lookup_failed", e.to_string())
        }
        Err(e) => errors::join_error_to_response(e),
    }
}

/// POST /api/submit
pub async fn submit(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SubmitRequest>,
) -> axum::response::Response {
    let username = match Username::parse(&body.username) {
        Ok(u) => u,
        Err(e) => return errors::admission_error_to_response(AdmissionError::Validation(e)),
    };
    if let Err(e) = services.admission.check() {
        return errors::admission_error_to_response(e);
    }

    match &services.admitter {
        Admitter::Queued { queue, .. } => {
            let queue = queue.clone();
            let admitted = tokio::task::spawn_blocking(move || {
                let id = queue.enqueue(username);
                queue.status(id)
            })
            .await;
            match admitted {
                Ok(view) => (StatusCode::OK, Json(dto::QueuedReceipt::from(view))).into_response(),
                Err(e) => errors::join_error_to_response(e),
            }
        }
        Admitter::SingleFlight(runner) => {
            let runner = runner.clone();
            let outcome = tokio::task::spawn_blocking(move || runner.submit(&username)).await;
            match outcome {
                Ok(Ok(JobOutcome::Completed(result))) => Json(dto::InlineResult {
                    status: ClientStatus::Completed,
                    result: Some(result),
                    error: None,
                })
                .into_response(),
                Ok(Ok(JobOutcome::Failed(error))) => Json(dto::InlineResult {
                    status: ClientStatus::Error,
                    result: None,
                    error: Some(error),
                })
                .into_response(),
                Ok(Err(e)) => errors::admission_error_to_response(e),
                Err(e) => errors::join_error_to_response(e),
            }
        }
    }
}

/// POST /api/queue/status
pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::StatusRequest>,
) -> axum::response::Response {
    let Admitter::Queued { queue, .. } = &services.admitter else {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "queue_disabled",
            "this deployment runs in single-flight mode and keeps no queue",
        );
    };

    let id: JobId = match body.client_id.trim().parse() {
        Ok(id) => id,
        Err(e) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_client_id",
                format!("{e}"),
            )
        }
    };

    let queue = queue.clone();
    match tokio::task::spawn_blocking(move || queue.status(id)).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::join_error_to_response(e),
    }
}

/// GET /api/queue/global-status
pub async fn global_status(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let status = match &services.admitter {
        Admitter::Queued { queue, .. } => queue.global_status(),
        Admitter::SingleFlight(runner) => {
            let busy = runner.is_busy();
            GlobalStatus {
                status: if busy {
                    QueueActivity::Active
                } else {
                    QueueActivity::Idle
                },
                total_queue: usize::from(busy),
                estimated_time: 0.0,
                avg_processing_time: DEFAULT_ESTIMATE_SECS,
            }
        }
    };
    Json(status)
}

/// GET /api/activity?limit=N
pub async fn activity(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ActivityQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, RECENT_CAPACITY);
    Json(json!({ "activity": services.ledger.recent(limit) }))
}

/// GET /api/settings/public
pub async fn public_settings(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let settings = services.settings.get();
    Json(json!({
        "announcement": settings.announcement,
        "maintenance_mode": settings.maintenance_mode,
    }))
}
