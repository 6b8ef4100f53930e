use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.upload_body_limit();

    Router::new()
        // Transfers
        .route(
            "/api/uploads",
            post(handlers::create_transfer).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/transfers/:id", get(handlers::get_transfer))
        // Downloads
        .route("/d/:id/:file_id", get(handlers::download_file))
        // Internal
        .route("/api/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
