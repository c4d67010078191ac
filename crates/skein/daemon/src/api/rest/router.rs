//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        // Query workflow
        .route("/workflows/query", post(handlers::submit_query))
        .route("/workflows/query/:id", get(handlers::get_query))
        .route("/workflows/query/:id/cancel", post(handlers::cancel_query))
        // Bulk import workflow
        .route("/workflows/bulk-import", post(handlers::submit_bulk))
        .route("/workflows/bulk-import/:id", get(handlers::get_bulk))
        .route(
            "/workflows/bulk-import/:id/cancel",
            post(handlers::cancel_bulk),
        )
        // Page cursors
        .route("/pages/:cursor", get(handlers::get_page));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
