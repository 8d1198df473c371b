// Trino adapter using the HTTP statement protocol
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

use crate::api::middleware::AppError;
use crate::config::EngineConfig;
use crate::services::engine::{FederationEngine, StatementPage};

pub struct TrinoClient {
    base_url: String,
    user: String,
    source: String,
    client_tags: Option<String>,
    client: Client,
}

impl TrinoClient {
    pub fn new(config: &EngineConfig) -> Result<Self, AppError> {
        let url = Url::parse(&config.url)
            .map_err(|e| AppError::Validation(format!("Invalid engine URL: {}", e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(AppError::Validation(
                "Engine URL must use http:// or https:// scheme".to_string(),
            ));
        }

        // Keep scheme, host and port only
        let base_url = url.origin().ascii_serialization();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            user: config.user.clone(),
            source: config.source.clone(),
            client_tags: None,
            client,
        })
    }

    /// Client tagged with the workspace it serves
    pub fn for_workspace(config: &EngineConfig, workspace_id: &str) -> Result<Self, AppError> {
        let mut client = Self::new(config)?;
        client.client_tags = Some(format!("workspace={}", workspace_id));
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn with_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .header("X-Trino-User", &self.user)
            .header("X-Trino-Source", &self.source);
        match &self.client_tags {
            Some(tags) => request.header("X-Trino-Client-Tags", tags),
            None => request,
        }
    }

    async fn read_page(response: reqwest::Response) -> Result<StatementPage, AppError> {
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Execution(format!(
                "Trino request failed ({}): {}",
                status, error_body
            )));
        }

        response
            .json::<StatementPage>()
            .await
            .map_err(|e| AppError::Execution(format!("Failed to parse Trino response: {}", e)))
    }
}

#[async_trait]
impl FederationEngine for TrinoClient {
    async fn submit(&self, sql: &str) -> Result<StatementPage, AppError> {
        let endpoint = format!("{}/v1/statement", self.base_url);

        let response = self
            .with_headers(self.client.post(&endpoint))
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| AppError::Execution(format!("Failed to reach Trino at {}: {}", self.base_url, e)))?;

        Self::read_page(response).await
    }

    async fn poll(&self, next_uri: &str) -> Result<StatementPage, AppError> {
        let response = self
            .with_headers(self.client.get(next_uri))
            .send()
            .await
            .map_err(|e| AppError::Execution(format!("Failed to poll Trino: {}", e)))?;

        // Coordinator asks the client to back off and retry the same URI
        if matches!(
            response.status(),
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS
        ) {
            tracing::debug!("Trino busy ({}), polling again", response.status());
            return Ok(StatementPage::retry(next_uri));
        }

        Self::read_page(response).await
    }

    fn engine_type(&self) -> &str {
        "trino"
    }
}
