//! API routes.

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{cancel_export, create_export, download_export, get_export, health, list_cameras};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/cameras", get(list_cameras))
        .route("/export", post(create_export))
        .route("/export/:id", get(get_export))
        .route("/export/:id", delete(cancel_export))
        .route("/export/:id/download", get(download_export));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
