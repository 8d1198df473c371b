// Data Explorer
//
// When a query returns no rows, sample the values actually present in the
// columns the query filtered on so the answer can explain the mismatch.
// Exploration SQL goes through the same mapping validator as generated SQL.

use std::sync::Arc;

use crate::models::ExecutionResult;
use crate::services::vkg::query_executor::QueryExecutor;
use crate::services::vkg::sql_fragment::{distinct_values_query, row_count_query, TableRef};
use crate::services::vkg::sql_heuristics::{FilterColumn, FilterExtractor};
use crate::validation::MappingValidator;

/// Result of one exploration query
#[derive(Debug, Clone, PartialEq)]
pub enum Exploration {
    /// Most frequent values of a filter column, with counts
    Values {
        filter: FilterColumn,
        values: Vec<(serde_json::Value, i64)>,
    },
    RowCount {
        table: TableRef,
        rows: i64,
    },
    Unavailable {
        target: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExplorationOutcome {
    /// The SQL has no recoverable filter columns; nothing was run
    NoFilters,
    Explored(Vec<Exploration>),
}

impl ExplorationOutcome {
    /// Plain-text summary fed to the answer model
    pub fn summary(&self) -> String {
        let ExplorationOutcome::Explored(explorations) = self else {
            return String::new();
        };
        let mut lines = Vec::new();
        for exploration in explorations {
            match exploration {
                Exploration::Values { filter, values } if values.is_empty() => {
                    lines.push(format!("Column {}.{} has no values", filter.table, filter.column));
                }
                Exploration::Values { filter, values } => {
                    let rendered: Vec<String> = values
                        .iter()
                        .map(|(value, count)| format!("{} ({})", render_value(value), count))
                        .collect();
                    lines.push(format!(
                        "Most common values of {}.{}: {}",
                        filter.table,
                        filter.column,
                        rendered.join(", ")
                    ));
                }
                Exploration::RowCount { table, rows } => {
                    lines.push(format!("Table {} contains {} row(s)", table, rows));
                }
                Exploration::Unavailable { target, reason } => {
                    lines.push(format!("Could not explore {}: {}", target, reason));
                }
            }
        }
        lines.join("\n")
    }

    pub fn queries_run(&self) -> usize {
        match self {
            ExplorationOutcome::NoFilters => 0,
            ExplorationOutcome::Explored(explorations) => explorations
                .iter()
                .filter(|e| !matches!(e, Exploration::Unavailable { .. }))
                .count(),
        }
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => format!("'{}'", s),
        serde_json::Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

pub struct DataExplorer {
    extractor: Arc<dyn FilterExtractor>,
    executor: Arc<QueryExecutor>,
    limit: u64,
}

impl DataExplorer {
    pub fn new(extractor: Arc<dyn FilterExtractor>, executor: Arc<QueryExecutor>, limit: u64) -> Self {
        Self {
            extractor,
            executor,
            limit,
        }
    }

    /// One distinct-values query per filter column, then one row count per
    /// filtered table. Failures are recorded, never raised.
    pub async fn explore(&self, workspace_id: &str, sql: &str, validator: &MappingValidator) -> ExplorationOutcome {
        let filters: Vec<FilterColumn> = self
            .extractor
            .filter_columns(sql)
            .into_iter()
            .map(|filter| FilterColumn {
                table: validator.qualify(&filter.table).unwrap_or(filter.table),
                column: filter.column,
            })
            .collect();
        if filters.is_empty() {
            tracing::debug!("No filter columns recovered from zero-row query");
            return ExplorationOutcome::NoFilters;
        }

        let mut tables: Vec<TableRef> = Vec::new();
        for filter in &filters {
            if !tables.contains(&filter.table) {
                tables.push(filter.table.clone());
            }
        }
        tracing::info!(
            "Exploring {} filter column(s) across {} table(s)",
            filters.len(),
            tables.len()
        );

        let mut explorations = Vec::with_capacity(filters.len() + tables.len());
        for filter in filters {
            let query = distinct_values_query(&filter.table, &filter.column, self.limit);
            let target = format!("{}.{}", filter.table, filter.column);
            let exploration = match self.run(workspace_id, &query, validator).await {
                Ok(result) => Exploration::Values {
                    values: value_counts(&result),
                    filter,
                },
                Err(reason) => Exploration::Unavailable { target, reason },
            };
            explorations.push(exploration);
        }
        for table in tables {
            let query = row_count_query(&table);
            let exploration = match self.run(workspace_id, &query, validator).await {
                Ok(result) => Exploration::RowCount {
                    rows: first_integer(&result).unwrap_or(0),
                    table,
                },
                Err(reason) => Exploration::Unavailable {
                    target: table.to_string(),
                    reason,
                },
            };
            explorations.push(exploration);
        }

        ExplorationOutcome::Explored(explorations)
    }

    async fn run(&self, workspace_id: &str, sql: &str, validator: &MappingValidator) -> Result<ExecutionResult, String> {
        let report = validator.validate(sql);
        if !report.valid {
            tracing::warn!("Exploration query rejected: {}", report.errors.join("; "));
            return Err(report.errors.join("; "));
        }
        self.executor.execute(workspace_id, sql).await.map_err(|e| {
            tracing::warn!("Exploration query failed: {}", e);
            e.to_string()
        })
    }
}

fn value_counts(result: &ExecutionResult) -> Vec<(serde_json::Value, i64)> {
    result
        .rows
        .iter()
        .filter_map(|row| {
            let value = row.first()?.clone();
            let count = row.get(1).and_then(as_integer).unwrap_or(0);
            Some((value, count))
        })
        .collect()
}

fn first_integer(result: &ExecutionResult) -> Option<i64> {
    result.rows.first()?.first().and_then(as_integer)
}

/// Engines return counts as numbers or, for bigint, sometimes as strings
fn as_integer(value: &serde_json::Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
