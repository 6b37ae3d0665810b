//! Admin routes: credential management, site settings, stats and rate-limit
//! telemetry.
//!
//! Not authenticated here; deployments put these behind an authenticating
//! proxy.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use turnstile_core::SettingsPatch;

use crate::app::services::{Admitter, AppServices};
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route(
            "/credentials",
            get(list_credentials)
                .post(append_credentials)
                .delete(clear_credentials),
        )
        .route("/credentials/reload", post(reload_credentials))
        .route("/credentials/:name", axum::routing::delete(delete_credential))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/stats", get(stats))
        .route("/rate-limit", get(rate_limit))
}

/// GET /admin/credentials
pub async fn list_credentials(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let credentials = services.pool.list();
    Json(json!({
        "total": credentials.len(),
        "live": services.pool.live_count(),
        "credentials": credentials,
    }))
}

/// POST /admin/credentials - Append one credential or a list
pub async fn append_credentials(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CredentialsUpload>,
) -> axum::response::Response {
    match services.pool.append(body.into_vec()) {
        Ok(added) => (
            StatusCode::CREATED,
            Json(json!({ "added": added, "live": services.pool.live_count() })),
        )
            .into_response(),
        Err(e) => errors::pool_error_to_response(e),
    }
}

/// DELETE /admin/credentials - Remove every credential
pub async fn clear_credentials(Extension(services): Extension<Arc<AppServices>>) -> StatusCode {
    services.pool.clear();
    StatusCode::NO_CONTENT
}

/// DELETE /admin/credentials/:name
pub async fn delete_credential(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match services.pool.delete(&name) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::pool_error_to_response(e),
    }
}

/// POST /admin/credentials/reload - Re-read the stored credential set
pub async fn reload_credentials(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.pool.reload() {
        Ok(total) => Json(json!({ "total": total, "live": services.pool.live_count() })).into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}

/// GET /admin/settings
pub async fn get_settings(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.settings.get())
}

/// PUT /admin/settings - Partial update
pub async fn update_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Json(patch): Json<SettingsPatch>,
) -> axum::response::Response {
    match services.settings.update(patch) {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
    }
}

/// GET /admin/stats
pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let queue = match &services.admitter {
        Admitter::Queued { queue, .. } => Some(queue.global_status()),
        Admitter::SingleFlight(_) => None,
    };
    Json(json!({
        "summary": services.ledger.admin_summary(),
        "queue": queue,
        "credentials": {
            "total": services.pool.list().len(),
            "live": services.pool.live_count(),
        },
    }))
}

/// GET /admin/rate-limit
pub async fn rate_limit(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.telemetry.current())
}
