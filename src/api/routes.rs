use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{catalog, ontology, vkg, AppState};

/// Create the application router over the shared service context
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/workspaces/{workspace_id}/catalogs",
            get(catalog::list_catalogs).post(catalog::register_catalog),
        )
        .route(
            "/api/workspaces/{workspace_id}/catalogs/{catalog_name}",
            delete(catalog::unregister_catalog),
        )
        .route(
            "/api/workspaces/{workspace_id}/catalogs/{catalog_name}/refresh",
            post(catalog::refresh_catalog),
        )
        .route(
            "/api/workspaces/{workspace_id}/ontology",
            put(ontology::import_ontology),
        )
        .route(
            "/api/workspaces/{workspace_id}/vkg/query",
            post(vkg::query),
        )
        .route(
            "/api/workspaces/{workspace_id}/vkg/context",
            get(vkg::get_context),
        )
        .route(
            "/api/workspaces/{workspace_id}/vkg/cache/invalidate",
            post(vkg::invalidate_cache),
        )
        .route(
            "/api/workspaces/{workspace_id}/vkg/drift",
            get(vkg::detect_drift),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
