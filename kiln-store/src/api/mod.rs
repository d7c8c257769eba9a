//! API Module
//!
//! HTTP API layer for the artifact store.

pub mod artifact;
pub mod error;
pub mod health;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::get,
};
use tower_http::trace::TraceLayer;

use crate::service::artifact_service::ArtifactStore;

/// Create the main API router with all endpoints
pub fn create_router(store: ArtifactStore, max_upload_bytes: usize) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Artifact endpoints
        .route("/buildproducts", get(artifact::list_root))
        .route(
            "/buildproducts/{*path}",
            get(artifact::get_artifact).put(artifact::upload_artifact),
        )
        // Add state and middleware
        .with_state(store)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
}
