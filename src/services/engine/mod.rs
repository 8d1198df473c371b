// Federation engine abstraction
//
// The engine speaks a paged statement protocol: submit returns the first page,
// each page may carry a `nextUri` to poll, and the statement is finished once
// a page arrives without one.

pub mod pool;
pub mod trino;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::api::middleware::AppError;
use crate::models::ResultColumn;

pub use pool::{mask_credentials, EngineClientPool, EngineFactory};
pub use trino::TrinoClient;

/// One page of a statement response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementPage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub next_uri: Option<String>,
    #[serde(default)]
    pub columns: Option<Vec<ResultColumn>>,
    #[serde(default)]
    pub data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    pub stats: Option<StatementStats>,
    #[serde(default)]
    pub error: Option<StatementError>,
}

impl StatementPage {
    /// A page that only asks the caller to poll `uri` again
    pub fn retry(uri: &str) -> Self {
        Self {
            next_uri: Some(uri.to_string()),
            ..Default::default()
        }
    }

    pub fn is_final(&self) -> bool {
        self.next_uri.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementStats {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub elapsed_time_millis: Option<u64>,
}

/// In-band failure reported by the engine
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error_name: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

impl std::fmt::Display for StatementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Statement submission and polling against the federation engine
#[async_trait]
pub trait FederationEngine: Send + Sync {
    async fn submit(&self, sql: &str) -> Result<StatementPage, AppError>;

    async fn poll(&self, next_uri: &str) -> Result<StatementPage, AppError>;

    fn engine_type(&self) -> &str;
}
