// Answer Generator
//
// Turns the execution result and context graph into a conversational answer.
// Zero-row results are explained with sampled filter values; a model failure
// falls back to a deterministic summary.

use std::sync::Arc;

use crate::models::{ContextGraph, ExecutionResult};
use crate::services::llm_service::{ChatMessage, ChatOptions, LlmClient};
use crate::services::vkg::data_explorer::{DataExplorer, ExplorationOutcome};
use crate::validation::MappingValidator;

pub const NO_RESULTS_MESSAGE: &str = "The query ran successfully but returned no results. \
No filter conditions could be identified to explore, so try rephrasing the question \
or broadening its criteria.";

const ANSWER_SYSTEM_PROMPT: &str = "You answer business questions from query results. \
Be concise and specific, quote the relevant numbers, and do not invent data that is not in the results.";

/// Answer text, plus the model error when the fallback was used
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub fallback_reason: Option<String>,
}

impl Answer {
    fn generated(text: String) -> Self {
        Self {
            text,
            fallback_reason: None,
        }
    }
}

pub struct AnswerGenerator {
    llm: Arc<dyn LlmClient>,
    explorer: DataExplorer,
    sample_rows: usize,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, explorer: DataExplorer, sample_rows: usize) -> Self {
        Self {
            llm,
            explorer,
            sample_rows,
        }
    }

    pub async fn generate(
        &self,
        question: &str,
        workspace_id: &str,
        sql: &str,
        result: &ExecutionResult,
        graph: &ContextGraph,
        validator: &MappingValidator,
    ) -> Answer {
        if result.row_count == 0 {
            return self.explain_empty(question, workspace_id, sql, validator).await;
        }

        let sample = result.rows_as_objects(self.sample_rows);
        let sample_json = serde_json::to_string_pretty(&sample).unwrap_or_else(|_| "[]".to_string());
        let mut prompt = format!("Question: {}\n\nSQL executed:\n{}\n\n", question, sql);
        prompt.push_str(&format!(
            "Result: {} row(s); showing the first {}:\n{}\n\n",
            result.row_count,
            sample.len(),
            sample_json
        ));
        prompt.push_str(&format!(
            "Entities found: {} node(s), {} relationship(s)",
            graph.statistics.node_count, graph.statistics.edge_count
        ));
        if !graph.statistics.nodes_by_type.is_empty() {
            let by_type: Vec<String> = graph
                .statistics
                .nodes_by_type
                .iter()
                .map(|(class, count)| format!("{} {}", count, class))
                .collect();
            prompt.push_str(&format!(" ({})", by_type.join(", ")));
        }
        prompt.push_str("\n\nAnswer the question in a few sentences.");

        match self.ask(prompt).await {
            Ok(text) => Answer::generated(text),
            Err(reason) => Answer {
                text: result_summary(result, graph),
                fallback_reason: Some(reason),
            },
        }
    }

    async fn explain_empty(
        &self,
        question: &str,
        workspace_id: &str,
        sql: &str,
        validator: &MappingValidator,
    ) -> Answer {
        let outcome = self.explorer.explore(workspace_id, sql, validator).await;
        if outcome == ExplorationOutcome::NoFilters {
            return Answer::generated(NO_RESULTS_MESSAGE.to_string());
        }

        let summary = outcome.summary();
        let prompt = format!(
            "Question: {}\n\nSQL executed (returned no rows):\n{}\n\n\
             Values actually present in the filtered columns:\n{}\n\n\
             Explain why nothing matched and suggest how to rephrase the question using the values that exist.",
            question, sql, summary
        );
        match self.ask(prompt).await {
            Ok(text) => Answer::generated(text),
            Err(reason) => Answer {
                text: format!(
                    "The query returned no rows. The filtered columns contain:\n{}",
                    summary
                ),
                fallback_reason: Some(reason),
            },
        }
    }

    async fn ask(&self, prompt: String) -> Result<String, String> {
        let messages = [ChatMessage::system(ANSWER_SYSTEM_PROMPT), ChatMessage::user(prompt)];
        match self.llm.chat(&messages, &ChatOptions::default()).await {
            Ok(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(_) => {
                tracing::warn!("Answer model returned an empty response, using summary");
                Err("empty answer from model".to_string())
            }
            Err(e) => {
                tracing::warn!("Answer generation failed, using summary: {}", e);
                Err(e.to_string())
            }
        }
    }
}

/// Deterministic answer used when the model is unavailable
pub fn result_summary(result: &ExecutionResult, graph: &ContextGraph) -> String {
    let columns: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    let mut text = format!(
        "The query returned {} row(s) with column(s): {}.",
        result.row_count,
        columns.join(", ")
    );
    if !graph.statistics.nodes_by_type.is_empty() {
        let by_type: Vec<String> = graph
            .statistics
            .nodes_by_type
            .iter()
            .map(|(class, count)| format!("{} {}", count, class))
            .collect();
        text.push_str(&format!(" Entities involved: {}.", by_type.join(", ")));
    }
    if result.row_count == 1 && result.columns.len() == 1 {
        if let Some(value) = result.rows.first().and_then(|row| row.first()) {
            text.push_str(&format!(" Result: {}.", value));
        }
    }
    text
}
