use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::{AppError, TenantId};
use crate::models::OntologyImport;

/// Replace the workspace's ontology and mapping annotations
pub async fn import_ontology(
    State(state): State<AppState>,
    tenant: TenantId,
    Path(workspace_id): Path<String>,
    Json(payload): Json<OntologyImport>,
) -> Result<Json<serde_json::Value>, AppError> {
    payload.validate().map_err(AppError::Validation)?;

    state
        .storage
        .replace_ontology(tenant.as_str(), &workspace_id, &payload)
        .await?;
    state
        .orchestrator
        .context_loader()
        .invalidate(tenant.as_str(), &workspace_id)
        .await?;

    tracing::info!(
        "Imported ontology for workspace {}: {} class(es), {} class mapping(s)",
        workspace_id,
        payload.classes.len(),
        payload.mappings.classes.len()
    );

    Ok(Json(serde_json::json!({
        "workspace_id": workspace_id,
        "classes": payload.classes.len(),
        "object_properties": payload.object_properties.len(),
        "data_properties": payload.data_properties.len(),
        "class_mappings": payload.mappings.classes.len(),
        "property_mappings": payload.mappings.properties.len(),
        "relationship_mappings": payload.mappings.relationships.len(),
    })))
}
