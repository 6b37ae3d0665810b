//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: constructs stores, the credential pool, the pipeline and
//!   the admission mode from configuration
//! - `routes/`: HTTP routes + handlers (public submission API, admin API)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api", routes::public_router())
        .nest("/admin", routes::admin::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
