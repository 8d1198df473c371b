use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::{AppError, TenantId};
use crate::models::{SchemaDriftReport, VkgQueryRequest, VkgQueryResponse};

/// Answer a natural language question over the workspace's ontology.
///
/// Pipeline failures come back as a 200 with `error` populated; only bad
/// input is rejected up front.
pub async fn query(
    State(state): State<AppState>,
    tenant: TenantId,
    Path(workspace_id): Path<String>,
    Json(payload): Json<VkgQueryRequest>,
) -> Result<Json<VkgQueryResponse>, AppError> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err(AppError::Validation("Question cannot be empty".to_string()));
    }

    tracing::info!("VKG query for workspace {} ({}): {}", workspace_id, tenant.as_str(), question);
    let response = state
        .orchestrator
        .answer(tenant.as_str(), &workspace_id, question)
        .await;
    Ok(Json(response))
}

/// Ontology context as the pipeline sees it
pub async fn get_context(
    State(state): State<AppState>,
    tenant: TenantId,
    Path(workspace_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let context = state
        .orchestrator
        .context_loader()
        .load(tenant.as_str(), &workspace_id)
        .await?;

    Ok(Json(serde_json::json!({
        "workspace_id": workspace_id,
        "context": context,
    })))
}

pub async fn invalidate_cache(
    State(state): State<AppState>,
    tenant: TenantId,
    Path(workspace_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let invalidated = state
        .orchestrator
        .context_loader()
        .invalidate(tenant.as_str(), &workspace_id)
        .await?;

    Ok(Json(serde_json::json!({
        "workspace_id": workspace_id,
        "invalidated": invalidated,
    })))
}

/// Run drift detection on demand. Unlike the background check, failures
/// are reported to the caller.
pub async fn detect_drift(
    State(state): State<AppState>,
    tenant: TenantId,
    Path(workspace_id): Path<String>,
) -> Result<Json<SchemaDriftReport>, AppError> {
    let context = state
        .orchestrator
        .context_loader()
        .load(tenant.as_str(), &workspace_id)
        .await?;

    let report = state
        .orchestrator
        .drift_detector()
        .detect(tenant.as_str(), &workspace_id, &context.mappings)
        .await?;
    Ok(Json(report))
}
