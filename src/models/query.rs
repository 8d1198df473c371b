use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::graph::{ContextGraph, ReasoningTraceStep};

#[derive(Debug, Clone, Deserialize)]
pub struct VkgQueryRequest {
    pub question: String,
}

/// Aggregation requested by the question
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationKind {
    #[default]
    None,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Group,
}

impl AggregationKind {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "count" => AggregationKind::Count,
            "sum" => AggregationKind::Sum,
            "avg" | "average" | "mean" => AggregationKind::Avg,
            "min" | "minimum" => AggregationKind::Min,
            "max" | "maximum" => AggregationKind::Max,
            "group" | "group_by" | "groupby" => AggregationKind::Group,
            _ => AggregationKind::None,
        }
    }
}

/// Structured plan returned alongside the SQL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub entities: Vec<String>,
    pub relationships: Vec<String>,
    pub single_hop: bool,
    pub aggregation: AggregationKind,
    pub reasoning: String,
}

impl QueryPlan {
    /// Lenient conversion from model output; unknown or mistyped fields fall back to defaults
    pub fn from_value(value: &Value) -> Self {
        let strings = |key: &str| -> Vec<String> {
            match value.get(key) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Object(o) => o.get("name").and_then(|n| n.as_str()).map(str::to_string),
                        _ => None,
                    })
                    .collect(),
                Some(Value::String(s)) => s
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
                _ => Vec::new(),
            }
        };

        let single_hop = value
            .get("single_hop")
            .or_else(|| value.get("singleHop"))
            .or_else(|| value.get("is_single_hop"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let aggregation = value
            .get("aggregation")
            .and_then(|v| v.as_str())
            .map(AggregationKind::parse)
            .unwrap_or_default();

        let reasoning = value
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Self {
            entities: strings("entities"),
            relationships: strings("relationships"),
            single_hop,
            aggregation,
            reasoning,
        }
    }
}

/// Column descriptor in an engine result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// Rows returned by one successful execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub duration_ms: u64,
    /// Elapsed time reported by the engine itself
    pub engine_execution_ms: Option<u64>,
}

impl ExecutionResult {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Rows as JSON objects keyed by column name
    pub fn rows_as_objects(&self, limit: usize) -> Vec<Value> {
        self.rows
            .iter()
            .take(limit)
            .map(|row| {
                let mut obj = serde_json::Map::new();
                for (idx, column) in self.columns.iter().enumerate() {
                    obj.insert(column.name.clone(), row.get(idx).cloned().unwrap_or(Value::Null));
                }
                Value::Object(obj)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// One timed stage outcome in the execution pipeline log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub name: String,
    pub duration_ms: u64,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<usize>,
}

impl PipelineStep {
    pub fn success(name: &str, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            duration_ms,
            status: StepStatus::Success,
            error: None,
            attempt: None,
        }
    }

    pub fn failed(name: &str, duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            duration_ms,
            status: StepStatus::Failed,
            error: Some(error.into()),
            attempt: None,
        }
    }

    pub fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            duration_ms: 0,
            status: StepStatus::Skipped,
            error: None,
            attempt: None,
        }
    }

    pub fn with_attempt(mut self, attempt: usize) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Immutable record of one generation attempt, fed back on retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_number: usize,
    pub plan: Option<QueryPlan>,
    pub sql: Option<String>,
    pub error_feedback: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Citations {
    pub sql: String,
    pub databases: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_ms: u64,
    pub rows_returned: usize,
    pub databases_queried: usize,
    pub engine_execution_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPipeline {
    pub total_time_ms: u64,
    pub steps: Vec<PipelineStep>,
}

/// Response of the question-answering operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VkgQueryResponse {
    pub answer: String,
    pub question: String,
    pub context_graph: ContextGraph,
    pub reasoning_trace: Vec<ReasoningTraceStep>,
    pub citations: Citations,
    pub execution_stats: ExecutionStats,
    pub execution_pipeline: ExecutionPipeline,
    pub plan: Option<QueryPlan>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
