//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: pipeline registry and job service construction
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::ApiService;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<ApiService>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
