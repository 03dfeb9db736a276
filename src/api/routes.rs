use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::{handlers, state::AppState};

/// Upper bound on one multipart upload body
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Peer uploads
        .route(
            "/api/screenshot/:catalog_id",
            post(handlers::upload_screenshots).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        // Event bridge
        .route(
            "/api/events/screenshots-requested",
            post(handlers::screenshots_requested),
        )
        .route("/api/events/peer-available", post(handlers::peer_available))
        // Presigned object reads
        .route("/objects/:catalog_dir/:file", get(handlers::get_object))
        // System endpoints
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
