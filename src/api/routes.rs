//! API route definitions

use crate::manager::LifecycleManager;
use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<LifecycleManager>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Model lifecycle
        .route("/models/pull", post(handlers::pull_model))
        .route("/models", get(handlers::list_models))
        .route("/models/loaded", get(handlers::list_loaded))
        .route("/models/clear", post(handlers::clear_models))
        .route("/models/{name}", get(handlers::get_model))
        .route("/models/{name}", delete(handlers::delete_model))
        .route("/models/{name}/load", post(handlers::load_model))
        .route("/models/{name}/unload", post(handlers::unload_model))
        // Inference dispatch
        .route("/generate", post(handlers::generate))
        .route("/chat", post(handlers::chat))
        .route("/chat/stream", post(handlers::chat_stream))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
