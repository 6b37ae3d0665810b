use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use turnstile_infra::{AdmissionError, PoolError};

pub fn admission_error_to_response(err: AdmissionError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        AdmissionError::Busy => json_error(StatusCode::TOO_MANY_REQUESTS, "busy", message),
        AdmissionError::Maintenance => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "maintenance", message)
        }
        AdmissionError::QuotaReached { .. } => {
            json_error(StatusCode::TOO_MANY_REQUESTS, "quota_reached", message)
        }
        AdmissionError::Validation(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message)
        }
    }
}

pub fn pool_error_to_response(err: PoolError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        PoolError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        PoolError::Duplicate(_) => json_error(StatusCode::CONFLICT, "duplicate", message),
        PoolError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        PoolError::Exhausted => json_error(StatusCode::SERVICE_UNAVAILABLE, "exhausted", message),
    }
}

/// A blocking task that panicked or was cancelled.
pub fn join_error_to_response(err: tokio::task::JoinError) -> axum::response::Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
