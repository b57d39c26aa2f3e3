use crate::server::{handlers, types::AppState};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

// Room for the text fields and multipart framing around the image
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn create_router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes + FORM_OVERHEAD_BYTES;
    let state = Arc::new(state);

    Router::new()
        .route("/", get(handlers::index))
        .route("/predict", post(handlers::predict))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
