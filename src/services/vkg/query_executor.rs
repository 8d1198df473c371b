// Query Executor
//
// Drives the engine's submit/poll protocol to completion, accumulating the
// column list and row pages into one ExecutionResult.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::middleware::AppError;
use crate::config::EngineConfig;
use crate::models::{ExecutionResult, ResultColumn};
use crate::services::engine::{EngineClientPool, FederationEngine, StatementPage};

pub struct QueryExecutor {
    engines: Arc<EngineClientPool>,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl QueryExecutor {
    pub fn new(engines: Arc<EngineClientPool>, config: &EngineConfig) -> Self {
        Self {
            engines,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_poll_attempts: config.max_poll_attempts,
        }
    }

    /// Execute SQL on the workspace's engine client
    pub async fn execute(&self, workspace_id: &str, sql: &str) -> Result<ExecutionResult, AppError> {
        let engine = self.engines.get_or_create(workspace_id).await?;
        self.execute_on(engine.as_ref(), sql).await
    }

    pub async fn execute_on(&self, engine: &dyn FederationEngine, sql: &str) -> Result<ExecutionResult, AppError> {
        let start = Instant::now();
        let mut accumulator = PageAccumulator::default();

        tracing::debug!("Submitting statement to {}: {}", engine.engine_type(), sql);
        let mut page = engine.submit(sql).await?;
        let mut polls: u32 = 0;

        loop {
            let next_uri = accumulator.absorb(page)?;
            let Some(next_uri) = next_uri else {
                break;
            };
            if polls >= self.max_poll_attempts {
                return Err(AppError::Timeout(format!(
                    "Query did not finish after {} polls ({} ms)",
                    polls,
                    start.elapsed().as_millis()
                )));
            }
            polls += 1;
            tokio::time::sleep(self.poll_interval).await;
            page = engine.poll(&next_uri).await?;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let result = accumulator.finish(duration_ms);
        tracing::info!(
            "Statement finished: {} row(s) in {} ms after {} poll(s)",
            result.row_count,
            duration_ms,
            polls
        );
        Ok(result)
    }
}

#[derive(Default)]
struct PageAccumulator {
    columns: Vec<ResultColumn>,
    rows: Vec<Vec<serde_json::Value>>,
    engine_execution_ms: Option<u64>,
}

impl PageAccumulator {
    /// Fold a page in; returns the URI to poll next, if any
    fn absorb(&mut self, page: StatementPage) -> Result<Option<String>, AppError> {
        if let Some(error) = page.error {
            return Err(AppError::Execution(error.to_string()));
        }
        if let Some(stats) = &page.stats {
            if stats.state.eq_ignore_ascii_case("FAILED") {
                return Err(AppError::Execution(format!(
                    "Query {} failed without an error payload",
                    page.id.as_deref().unwrap_or("unknown")
                )));
            }
            if stats.elapsed_time_millis.is_some() {
                self.engine_execution_ms = stats.elapsed_time_millis;
            }
        }
        if self.columns.is_empty() {
            if let Some(columns) = page.columns {
                self.columns = columns;
            }
        }
        if let Some(data) = page.data {
            self.rows.extend(data);
        }
        Ok(page.next_uri)
    }

    fn finish(self, duration_ms: u64) -> ExecutionResult {
        ExecutionResult {
            row_count: self.rows.len(),
            columns: self.columns,
            rows: self.rows,
            duration_ms,
            engine_execution_ms: self.engine_execution_ms,
        }
    }
}
