use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::{AppError, TenantId};
use crate::models::RegisterCatalogRequest;
use crate::services::CatalogRegistry;

/// List catalogs registered in a workspace
pub async fn list_catalogs(
    State(state): State<AppState>,
    tenant: TenantId,
    Path(workspace_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let catalogs = state.catalogs.list_catalogs(tenant.as_str(), &workspace_id).await?;

    Ok(Json(serde_json::json!({
        "catalogs": catalogs
    })))
}

/// Register an external database as an engine catalog
pub async fn register_catalog(
    State(state): State<AppState>,
    tenant: TenantId,
    Path(workspace_id): Path<String>,
    Json(payload): Json<RegisterCatalogRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let entry = state
        .catalogs
        .register_catalog(tenant.as_str(), &workspace_id, payload)
        .await?;

    // Join augmentation depends on the catalog list
    state
        .orchestrator
        .context_loader()
        .invalidate(tenant.as_str(), &workspace_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "catalog": entry
        })),
    ))
}

pub async fn refresh_catalog(
    State(state): State<AppState>,
    tenant: TenantId,
    Path((workspace_id, catalog_name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let entry = state
        .catalogs
        .refresh_catalog(tenant.as_str(), &workspace_id, &catalog_name)
        .await?;
    state
        .orchestrator
        .context_loader()
        .invalidate(tenant.as_str(), &workspace_id)
        .await?;

    Ok(Json(serde_json::json!({
        "catalog": entry
    })))
}

pub async fn unregister_catalog(
    State(state): State<AppState>,
    tenant: TenantId,
    Path((workspace_id, catalog_name)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state
        .catalogs
        .unregister_catalog(tenant.as_str(), &workspace_id, &catalog_name)
        .await?;
    state
        .orchestrator
        .context_loader()
        .invalidate(tenant.as_str(), &workspace_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
