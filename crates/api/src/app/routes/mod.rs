use axum::{
    routing::{get, post},
    Router,
};

pub mod admin;
pub mod public;
pub mod system;

/// Router for the client-facing API.
pub fn public_router() -> Router {
    Router::new()
        .route("/user-info", post(public::user_info))
        .route("/submit", post(public::submit))
        .route("/queue/status", post(public::status))
        .route("/queue/global-status", get(public::global_status))
        .route("/activity", get(public::activity))
        .route("/settings/public", get(public::public_settings))
}
