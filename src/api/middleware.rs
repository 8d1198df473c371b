use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header carrying the caller's tenant identity
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant used when the header is absent
pub const DEFAULT_TENANT: &str = "default";

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("LLM service error: {0}")]
    LlmService(String),

    /// The model produced an empty or unparseable plan/SQL
    #[error("Generation error: {0}")]
    Generation(String),

    /// Generated SQL references tables or columns absent from the mappings
    #[error("SQL validation failed: {0}")]
    SqlValidation(String),

    /// The federation engine rejected or failed the statement
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors the query pipeline may recover from by regenerating SQL
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Generation(_)
                | AppError::SqlValidation(_)
                | AppError::Execution(_)
                | AppError::Timeout(_)
                | AppError::LlmService(_)
        )
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::Database(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("DATABASE_ERROR", msg),
            ),
            AppError::Connection(msg) => (
                StatusCode::BAD_GATEWAY,
                ErrorDetail::new("CONNECTION_ERROR", msg),
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg),
            ),
            AppError::LlmService(msg) => {
                let enhanced_msg = if msg.contains("not configured") {
                    format!("{} Please configure the LLM_GATEWAY_URL environment variable.", msg)
                } else {
                    msg
                };
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetail::new("LLM_SERVICE_ERROR", enhanced_msg),
                )
            }
            AppError::Generation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("GENERATION_ERROR", msg),
            ),
            AppError::SqlValidation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("SQL_VALIDATION_ERROR", msg)
                    .with_details("Generated SQL references tables or columns outside the ontology mappings."),
            ),
            AppError::Execution(msg) => (
                StatusCode::BAD_GATEWAY,
                ErrorDetail::new("EXECUTION_ERROR", msg),
            ),
            AppError::Timeout(msg) => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorDetail::new("TIMEOUT", msg)
                    .with_details("Consider simplifying your question or checking engine load."),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", msg),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Convert rusqlite::Error to AppError
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization failed: {}", err))
    }
}

/// Tenant identity extracted from the request headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant = match parts.headers.get(TENANT_HEADER) {
            Some(value) => value
                .to_str()
                .map_err(|_| AppError::Validation(format!("Invalid {} header", TENANT_HEADER)))?
                .trim()
                .to_string(),
            None => DEFAULT_TENANT.to_string(),
        };

        if tenant.is_empty() {
            return Err(AppError::Validation(format!("{} header cannot be empty", TENANT_HEADER)));
        }

        Ok(TenantId(tenant))
    }
}
