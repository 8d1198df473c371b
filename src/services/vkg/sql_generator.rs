// Plan + SQL Generator
//
// One chat call per attempt. The prompt carries the filtered ontology, the
// physical mappings (with an explicit property -> column dictionary) and the
// join conditions; earlier failed attempts are replayed as assistant/user
// turns so the model can correct itself.

use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};

use crate::api::middleware::AppError;
use crate::models::{AttemptRecord, OntologyContext, QueryPlan};
use crate::services::llm_service::{ChatMessage, ChatOptions, LlmClient};
use crate::validation::sql_validator::SqlValidator;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex"));
static FENCED_SQL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```sql\s*(.*?)```").expect("valid regex"));
static BARE_SQL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\b(SELECT|WITH)\b").expect("valid regex"));
static LIMIT_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(LIMIT\s+\d+|FETCH\s+FIRST)\b").expect("valid regex"));

const SYSTEM_PROMPT: &str = r#"You are a data analyst that translates business questions into one federated SQL query for a Trino engine.

Rules:
1. Use ONLY the tables and columns listed under "Physical mappings".
2. Always write tables fully qualified as catalog.schema.table.
3. Ontology property names are NOT column names. Use the column from the property -> column dictionary.
4. Join tables only with the listed join conditions.
5. Generate exactly one read-only SELECT statement (WITH is allowed).

Respond with a single JSON object and nothing else:
{"plan": {"entities": ["Class", ...], "relationships": ["relationship", ...], "single_hop": true|false, "aggregation": "none|count|sum|avg|min|max|group", "reasoning": "short explanation"}, "sql": "SELECT ..."}"#;

/// Plan and SQL produced by one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedQuery {
    pub plan: QueryPlan,
    pub sql: String,
}

pub struct PlanSqlGenerator {
    llm: Arc<dyn LlmClient>,
    default_row_limit: u64,
}

impl PlanSqlGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, default_row_limit: u64) -> Self {
        Self { llm, default_row_limit }
    }

    /// Generate plan + SQL, replaying `history` as correction turns
    pub async fn generate(
        &self,
        question: &str,
        context: &OntologyContext,
        history: &[AttemptRecord],
    ) -> Result<GeneratedQuery, AppError> {
        let messages = build_messages(question, context, history);
        let options = ChatOptions {
            temperature: Some(0.0),
            max_tokens: None,
            json_response: true,
        };

        let raw = self.llm.chat(&messages, &options).await?;
        let mut generated = parse_generation(&raw)?;
        generated.sql = apply_row_limit(&generated.sql, self.default_row_limit);

        tracing::debug!(
            "Generated SQL (attempt {}): {}",
            history.len() + 1,
            generated.sql
        );
        Ok(generated)
    }
}

/// Render the ontology and mapping context for the prompt
pub fn describe_context(context: &OntologyContext) -> String {
    let schema = &context.filtered_schema;
    let mappings = &context.mappings;
    let mut text = format!("Workspace: {}\n\n", context.workspace_name);

    text.push_str("Ontology classes:\n");
    for class in &schema.classes {
        text.push_str(&format!("  - {}", class.name));
        if let Some(description) = &class.description {
            text.push_str(&format!(": {}", description));
        }
        if !class.properties.is_empty() {
            text.push_str(&format!(" (properties: {})", class.properties.join(", ")));
        }
        text.push('\n');
    }
    if !schema.object_properties.is_empty() {
        text.push_str("\nOntology relationships:\n");
        for rel in &schema.object_properties {
            text.push_str(&format!("  - {}: {} -> {}\n", rel.name, rel.domain, rel.range));
        }
    }

    text.push_str("\nPhysical mappings:\n");
    if mappings.classes.is_empty() {
        text.push_str("  (no mapped tables)\n");
    }
    for class in &mappings.classes {
        text.push_str(&format!("  - {} -> table {}", class.class_name, class.source_table));
        if let Some(pk) = &class.primary_key {
            text.push_str(&format!(" [key: {}]", pk));
        }
        text.push('\n');
    }

    if !mappings.properties.is_empty() {
        text.push_str("\nOntology property name -> actual column name:\n");
        for prop in &mappings.properties {
            text.push_str(&format!(
                "  - {} -> {}.{} ({})\n",
                prop.property_name, prop.source_table, prop.source_column, prop.data_type
            ));
        }
    }

    if !mappings.relationships.is_empty() {
        text.push_str("\nJoin conditions:\n");
        for rel in &mappings.relationships {
            text.push_str(&format!(
                "  - {} ({} -> {}): {}\n",
                rel.name, rel.domain_class, rel.range_class, rel.join_condition
            ));
        }
    }

    text
}

pub fn build_messages(question: &str, context: &OntologyContext, history: &[AttemptRecord]) -> Vec<ChatMessage> {
    let mut messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!("{}\nQuestion: {}", describe_context(context), question)),
    ];

    for record in history {
        let previous = match (&record.plan, &record.sql) {
            (_, None) => "(no usable plan or SQL was produced)".to_string(),
            (plan, Some(sql)) => serde_json::json!({ "plan": plan, "sql": sql }).to_string(),
        };
        messages.push(ChatMessage::assistant(previous));

        let feedback = record
            .error_feedback
            .as_deref()
            .unwrap_or("The previous answer could not be used.");
        messages.push(ChatMessage::user(format!(
            "Attempt {} failed: {}\nFix the query using only the mapped tables and columns, and answer again with the same JSON format.",
            record.attempt_number, feedback
        )));
    }

    messages
}

/// Extract `{plan, sql}` from a model response
pub fn parse_generation(raw: &str) -> Result<GeneratedQuery, AppError> {
    if let Some(value) = extract_json_object(raw) {
        let sql = value
            .get("sql")
            .or_else(|| value.get("query"))
            .and_then(Value::as_str)
            .map(clean_sql)
            .filter(|s| !s.is_empty());
        if let Some(sql) = sql {
            let plan = match value.get("plan") {
                Some(plan) => QueryPlan::from_value(plan),
                None => QueryPlan::from_value(&value),
            };
            return Ok(GeneratedQuery { plan, sql });
        }
    }

    if let Some(sql) = extract_sql_text(raw) {
        tracing::warn!("Model returned no JSON plan; using the bare SQL statement");
        return Ok(GeneratedQuery {
            plan: QueryPlan {
                reasoning: "No structured plan was returned".to_string(),
                ..Default::default()
            },
            sql,
        });
    }

    Err(AppError::Generation(
        "Model response contained no SQL statement".to_string(),
    ))
}

fn extract_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    let as_object = |text: &str| match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    };

    if let Some(value) = as_object(trimmed) {
        return Some(value);
    }
    if let Some(captures) = FENCED_JSON.captures(trimmed) {
        if let Some(value) = as_object(&captures[1]) {
            return Some(value);
        }
    }
    // Object surrounded by prose
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    as_object(&trimmed[start..=end])
}

fn extract_sql_text(raw: &str) -> Option<String> {
    if let Some(captures) = FENCED_SQL.captures(raw) {
        let sql = clean_sql(&captures[1]);
        if !sql.is_empty() {
            return Some(sql);
        }
    }

    let start = BARE_SQL.find(raw)?.start();
    let rest = &raw[start..];
    let end = rest.find(';').or_else(|| rest.find("```")).unwrap_or(rest.len());
    let sql = clean_sql(&rest[..end]);
    (!sql.is_empty()).then_some(sql)
}

fn clean_sql(sql: &str) -> String {
    sql.trim()
        .trim_start_matches("```sql")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .trim_end_matches(';')
        .trim()
        .to_string()
}

/// Append `LIMIT n` when the statement has no row limit. Unparseable SQL
/// falls back to a textual check; the validator reports the parse error.
pub fn apply_row_limit(sql: &str, limit: u64) -> String {
    match SqlValidator::ensure_limit(sql, limit) {
        Ok(limited) => limited,
        Err(_) if LIMIT_CLAUSE.is_match(sql) => sql.to_string(),
        Err(_) => format!("{} LIMIT {}", sql.trim().trim_end_matches(';').trim_end(), limit),
    }
}
