// VKG Orchestrator
//
// LOAD_CONTEXT -> GENERATE_PLAN_SQL -> VALIDATE_SQL -> EXECUTE -> BUILD_GRAPH
// -> GENERATE_ANSWER. Generation, validation and execution failures loop
// back to generation with the error appended to the attempt history, at most
// MAX_ATTEMPTS times. Errors regeneration cannot fix end the loop at once. Drift detection runs on its own task from context load
// until the response is assembled. Every outcome is a response, never an error.

use std::sync::Arc;
use std::time::Instant;

use crate::models::{
    AttemptRecord, Citations, ContextGraph, ExecutionPipeline, ExecutionResult, ExecutionStats, OntologyContext,
    PipelineStep, QueryPlan, VkgQueryResponse,
};
use crate::services::vkg::answer_generator::AnswerGenerator;
use crate::services::vkg::context_loader::ContextLoader;
use crate::services::vkg::drift_detector::DriftDetector;
use crate::services::vkg::graph_builder::{ContextGraphBuilder, GraphBuild};
use crate::services::vkg::query_executor::QueryExecutor;
use crate::services::vkg::sql_generator::PlanSqlGenerator;
use crate::validation::{MappingValidator, ValidationReport};

pub const MAX_ATTEMPTS: usize = 3;

pub const STEP_LOAD_CONTEXT: &str = "Load Ontology Context";
pub const STEP_GENERATE: &str = "Generate Plan + SQL";
pub const STEP_VALIDATE: &str = "Validate SQL";
pub const STEP_EXECUTE: &str = "Trino Execution";
pub const STEP_BUILD_GRAPH: &str = "Build Context Graph";
pub const STEP_ANSWER: &str = "Generate Answer";

/// A validated statement and its rows
struct SuccessfulAttempt {
    plan: QueryPlan,
    sql: String,
    report: ValidationReport,
    result: ExecutionResult,
}

/// Outcome of the retry loop when no attempt succeeded
struct ExhaustedAttempts {
    history: Vec<AttemptRecord>,
    last_report: Option<ValidationReport>,
}

impl ExhaustedAttempts {
    fn stop(history: Vec<AttemptRecord>, last_report: Option<ValidationReport>) -> Self {
        Self { history, last_report }
    }
}

/// Response fields shared by the success and failure paths
struct Assembly<'a> {
    question: &'a str,
    started: Instant,
    steps: Vec<PipelineStep>,
    warnings: Vec<String>,
}

impl Assembly<'_> {
    fn timed(&mut self, name: &str, started: Instant, outcome: Result<(), String>, attempt: Option<usize>) {
        let elapsed = started.elapsed().as_millis() as u64;
        let mut step = match outcome {
            Ok(()) => PipelineStep::success(name, elapsed),
            Err(e) => PipelineStep::failed(name, elapsed, e),
        };
        if let Some(attempt) = attempt {
            step = step.with_attempt(attempt);
        }
        self.steps.push(step);
    }

    fn skip(&mut self, names: &[&str], attempt: Option<usize>) {
        for name in names {
            let step = PipelineStep::skipped(name);
            self.steps.push(match attempt {
                Some(attempt) => step.with_attempt(attempt),
                None => step,
            });
        }
    }

    fn failure(self, answer: String, error: String, plan: Option<QueryPlan>, sql: String, databases: Vec<String>) -> VkgQueryResponse {
        let total_ms = self.started.elapsed().as_millis() as u64;
        VkgQueryResponse {
            answer,
            question: self.question.to_string(),
            context_graph: ContextGraph::empty(&sql, databases.clone()),
            reasoning_trace: Vec::new(),
            citations: Citations {
                sql,
                databases: databases.clone(),
            },
            execution_stats: ExecutionStats {
                total_ms,
                rows_returned: 0,
                databases_queried: databases.len(),
                engine_execution_ms: 0,
                error: Some(error.clone()),
            },
            execution_pipeline: ExecutionPipeline {
                total_time_ms: total_ms,
                steps: self.steps,
            },
            plan,
            warnings: self.warnings,
            error: Some(error),
        }
    }
}

pub struct VkgOrchestrator {
    context_loader: Arc<ContextLoader>,
    generator: Arc<PlanSqlGenerator>,
    executor: Arc<QueryExecutor>,
    graph_builder: Arc<ContextGraphBuilder>,
    answer_generator: Arc<AnswerGenerator>,
    drift_detector: Arc<DriftDetector>,
}

impl VkgOrchestrator {
    pub fn new(
        context_loader: Arc<ContextLoader>,
        generator: Arc<PlanSqlGenerator>,
        executor: Arc<QueryExecutor>,
        graph_builder: Arc<ContextGraphBuilder>,
        answer_generator: Arc<AnswerGenerator>,
        drift_detector: Arc<DriftDetector>,
    ) -> Self {
        Self {
            context_loader,
            generator,
            executor,
            graph_builder,
            answer_generator,
            drift_detector,
        }
    }

    pub fn context_loader(&self) -> &Arc<ContextLoader> {
        &self.context_loader
    }

    pub fn drift_detector(&self) -> &Arc<DriftDetector> {
        &self.drift_detector
    }

    /// Answer a question for a tenant's workspace
    pub async fn answer(&self, tenant_id: &str, workspace_id: &str, question: &str) -> VkgQueryResponse {
        let mut assembly = Assembly {
            question,
            started: Instant::now(),
            steps: Vec::new(),
            warnings: Vec::new(),
        };
        tracing::info!("VKG query for {}/{}: {}", tenant_id, workspace_id, question);

        let stage = Instant::now();
        let context = match self.context_loader.load(tenant_id, workspace_id).await {
            Ok(context) => {
                assembly.timed(STEP_LOAD_CONTEXT, stage, Ok(()), None);
                context
            }
            Err(e) => {
                tracing::error!("Failed to load ontology context for workspace {}: {}", workspace_id, e);
                let error = e.to_string();
                assembly.timed(STEP_LOAD_CONTEXT, stage, Err(error.clone()), None);
                assembly.skip(&[STEP_GENERATE, STEP_VALIDATE, STEP_EXECUTE, STEP_BUILD_GRAPH, STEP_ANSWER], None);
                return assembly.failure(
                    "I couldn't load the ontology and mappings for this workspace, so the question could not be answered."
                        .to_string(),
                    error,
                    None,
                    String::new(),
                    Vec::new(),
                );
            }
        };

        let drift = self
            .drift_detector
            .spawn(tenant_id, workspace_id, context.mappings.clone());
        let validator = MappingValidator::new(&context.mappings);

        let outcome = self
            .run_attempts(workspace_id, question, &context, &validator, &mut assembly)
            .await;

        let drift_warnings = match drift.await {
            Ok(warnings) => warnings,
            Err(e) => {
                tracing::debug!("Drift detection task did not complete: {}", e);
                Vec::new()
            }
        };

        let success = match outcome {
            Ok(success) => success,
            Err(exhausted) => {
                if let Some(report) = &exhausted.last_report {
                    assembly.warnings.extend(report.warnings.iter().cloned());
                }
                assembly.warnings.extend(drift_warnings);
                assembly.skip(&[STEP_BUILD_GRAPH, STEP_ANSWER], None);

                let last = exhausted.history.last();
                let error = last
                    .and_then(|r| r.error_feedback.clone())
                    .unwrap_or_else(|| "Query generation failed".to_string());
                let attempts = exhausted.history.len();
                tracing::error!(
                    "VKG query for workspace {} failed after {} attempt(s): {}",
                    workspace_id,
                    attempts,
                    error
                );
                let answer = format!(
                    "Failed after {} attempt{} to answer the question. The last error was: {}",
                    attempts,
                    if attempts == 1 { "" } else { "s" },
                    error
                );
                let plan = exhausted.history.iter().rev().find_map(|r| r.plan.clone());
                let sql = exhausted
                    .history
                    .iter()
                    .rev()
                    .find_map(|r| r.sql.clone())
                    .unwrap_or_default();
                let databases = exhausted.last_report.map(|r| r.databases()).unwrap_or_default();
                return assembly.failure(answer, error, plan, sql, databases);
            }
        };

        assembly.warnings.extend(success.report.warnings.iter().cloned());
        assembly.warnings.extend(drift_warnings);
        let databases = success.report.databases();

        let stage = Instant::now();
        let built = match self
            .graph_builder
            .build(
                &success.result,
                &context,
                &success.sql,
                &success.report.referenced_tables,
                &databases,
            )
        {
            Ok(built) => {
                assembly.timed(STEP_BUILD_GRAPH, stage, Ok(()), None);
                built
            }
            Err(e) => {
                tracing::warn!("Context graph build failed, continuing without graph: {}", e);
                assembly.timed(STEP_BUILD_GRAPH, stage, Err(e.to_string()), None);
                GraphBuild {
                    graph: ContextGraph::empty(&success.sql, databases.clone()),
                    trace: Vec::new(),
                }
            }
        };

        let stage = Instant::now();
        let answer = self
            .answer_generator
            .generate(
                question,
                workspace_id,
                &success.sql,
                &success.result,
                &built.graph,
                &validator,
            )
            .await;
        let answer_outcome = match &answer.fallback_reason {
            None => Ok(()),
            Some(reason) => Err(format!("{} (summary answer used)", reason)),
        };
        assembly.timed(STEP_ANSWER, stage, answer_outcome, None);

        let total_ms = assembly.started.elapsed().as_millis() as u64;
        tracing::info!(
            "VKG query for workspace {} answered: {} row(s), {} node(s) in {} ms",
            workspace_id,
            success.result.row_count,
            built.graph.statistics.node_count,
            total_ms
        );

        VkgQueryResponse {
            answer: answer.text,
            question: question.to_string(),
            context_graph: built.graph,
            reasoning_trace: built.trace,
            citations: Citations {
                sql: success.sql,
                databases: databases.clone(),
            },
            execution_stats: ExecutionStats {
                total_ms,
                rows_returned: success.result.row_count,
                databases_queried: databases.len(),
                engine_execution_ms: success
                    .result
                    .engine_execution_ms
                    .unwrap_or(success.result.duration_ms),
                error: None,
            },
            execution_pipeline: ExecutionPipeline {
                total_time_ms: total_ms,
                steps: assembly.steps,
            },
            plan: Some(success.plan),
            warnings: assembly.warnings,
            error: None,
        }
    }

    /// The bounded generate -> validate -> execute loop
    async fn run_attempts(
        &self,
        workspace_id: &str,
        question: &str,
        context: &OntologyContext,
        validator: &MappingValidator,
        assembly: &mut Assembly<'_>,
    ) -> Result<SuccessfulAttempt, ExhaustedAttempts> {
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut last_report = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let stage = Instant::now();
            let generated = match self.generator.generate(question, context, &history).await {
                Ok(generated) => {
                    assembly.timed(STEP_GENERATE, stage, Ok(()), Some(attempt));
                    generated
                }
                Err(e) => {
                    tracing::warn!("Attempt {}: generation failed: {}", attempt, e);
                    assembly.timed(STEP_GENERATE, stage, Err(e.to_string()), Some(attempt));
                    assembly.skip(&[STEP_VALIDATE, STEP_EXECUTE], Some(attempt));
                    history.push(AttemptRecord {
                        attempt_number: attempt,
                        plan: None,
                        sql: None,
                        error_feedback: Some(e.to_string()),
                    });
                    if !e.is_retryable() {
                        tracing::warn!("Attempt {}: generation error is not recoverable, stopping", attempt);
                        return Err(ExhaustedAttempts::stop(history, last_report));
                    }
                    continue;
                }
            };

            let stage = Instant::now();
            let report = validator.validate(&generated.sql);
            if !report.valid {
                let feedback = format!("SQL validation failed: {}", report.errors.join("; "));
                tracing::warn!("Attempt {}: {}", attempt, feedback);
                assembly.timed(STEP_VALIDATE, stage, Err(feedback.clone()), Some(attempt));
                assembly.skip(&[STEP_EXECUTE], Some(attempt));
                history.push(AttemptRecord {
                    attempt_number: attempt,
                    plan: Some(generated.plan),
                    sql: Some(generated.sql),
                    error_feedback: Some(feedback),
                });
                last_report = Some(report);
                continue;
            }
            assembly.timed(STEP_VALIDATE, stage, Ok(()), Some(attempt));

            let stage = Instant::now();
            match self.executor.execute(workspace_id, &generated.sql).await {
                Ok(result) => {
                    assembly.timed(STEP_EXECUTE, stage, Ok(()), Some(attempt));
                    return Ok(SuccessfulAttempt {
                        plan: generated.plan,
                        sql: generated.sql,
                        report,
                        result,
                    });
                }
                Err(e) => {
                    tracing::warn!("Attempt {}: execution failed: {}", attempt, e);
                    assembly.timed(STEP_EXECUTE, stage, Err(e.to_string()), Some(attempt));
                    history.push(AttemptRecord {
                        attempt_number: attempt,
                        plan: Some(generated.plan),
                        sql: Some(generated.sql),
                        error_feedback: Some(e.to_string()),
                    });
                    last_report = Some(report);
                    if !e.is_retryable() {
                        tracing::warn!("Attempt {}: execution error is not recoverable, stopping", attempt);
                        return Err(ExhaustedAttempts::stop(history, last_report));
                    }
                }
            }
        }

        Err(ExhaustedAttempts::stop(history, last_report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::StepStatus;
    use crate::api::middleware::AppError;
    use crate::models::CatalogTable;
    use crate::services::engine::{EngineClientPool, FederationEngine};
    use crate::services::llm_service::LlmClient;
    use crate::services::schema_cache::{MemoryCacheStore, SchemaCache};
    use crate::services::vkg::data_explorer::DataExplorer;
    use crate::services::vkg::sql_heuristics::RegexFilterExtractor;
    use crate::services::vkg::test_support::{
        engine_pool, result_page, sales_catalog_tables, sales_catalogs, InMemoryOntologyStore, ScriptedCatalogRegistry,
        ScriptedEngine, ScriptedLlm, UnreachableEngine,
    };
    use serde_json::json;
    use std::time::Duration;

    const SCENARIO_A_SQL: &str = "SELECT c.id AS customer_id, c.name, t.id AS transaction_id, t.amount \
        FROM acme_sales.sales.customers c \
        JOIN acme_sales.sales.transactions t ON t.customer_id = c.id \
        WHERE t.amount > 10000";

    fn plan_reply(sql: &str) -> String {
        json!({
            "plan": {
                "entities": ["Customer", "Transaction"],
                "relationships": ["madeBy"],
                "single_hop": true,
                "aggregation": "none",
                "reasoning": "Join transactions to the customers that made them and filter on amount"
            },
            "sql": sql
        })
        .to_string()
    }

    fn orchestrator(
        store: InMemoryOntologyStore,
        llm: Arc<ScriptedLlm>,
        engine: Arc<dyn FederationEngine>,
    ) -> VkgOrchestrator {
        orchestrator_with(store, llm, engine_pool(engine), sales_catalog_tables())
    }

    /// Orchestrator over a given engine pool and live catalog view
    fn orchestrator_with(
        store: InMemoryOntologyStore,
        llm: Arc<ScriptedLlm>,
        pool: Arc<EngineClientPool>,
        live_tables: Vec<CatalogTable>,
    ) -> VkgOrchestrator {
        let config = Config::for_tests();
        let store = Arc::new(store);
        let registry = Arc::new(ScriptedCatalogRegistry::new(sales_catalogs(), live_tables));
        let cache = Arc::new(SchemaCache::new(
            Arc::new(MemoryCacheStore::default()),
            Duration::from_secs(600),
        ));
        let executor = Arc::new(QueryExecutor::new(pool, &config.engine));
        let llm: Arc<dyn LlmClient> = llm;
        let explorer = DataExplorer::new(Arc::new(RegexFilterExtractor), executor.clone(), 25);

        VkgOrchestrator::new(
            Arc::new(ContextLoader::new(store.clone(), store, registry.clone(), cache)),
            Arc::new(PlanSqlGenerator::new(llm.clone(), 100)),
            executor,
            Arc::new(ContextGraphBuilder),
            Arc::new(AnswerGenerator::new(llm, explorer, 20)),
            Arc::new(DriftDetector::new(registry)),
        )
    }

    fn steps_named<'a>(response: &'a VkgQueryResponse, name: &'a str) -> Vec<&'a PipelineStep> {
        response
            .execution_pipeline
            .steps
            .iter()
            .filter(|s| s.name == name)
            .collect()
    }

    #[tokio::test]
    async fn test_customers_with_large_transactions() {
        let reply = plan_reply(SCENARIO_A_SQL);
        let llm = Arc::new(ScriptedLlm::replying(&[
            reply.as_str(),
            "Ada made two transactions over 10,000.",
        ]));
        let engine = Arc::new(ScriptedEngine::paged(vec![result_page(
            &["customer_id", "name", "transaction_id", "amount"],
            vec![
                vec![json!(1), json!("Ada"), json!(10), json!(15000)],
                vec![json!(1), json!("Ada"), json!(11), json!(12500)],
            ],
        )]));

        let response = orchestrator(InMemoryOntologyStore::sales(), llm, engine.clone())
            .answer("acme", "ws1", "Which customers made transactions over 10000?")
            .await;

        assert!(response.error.is_none(), "{:?}", response.error);
        assert_eq!(response.answer, "Ada made two transactions over 10,000.");

        let plan = response.plan.as_ref().unwrap();
        assert!(plan.entities.contains(&"Customer".to_string()));
        assert!(plan.entities.contains(&"Transaction".to_string()));

        let submitted = engine.submitted();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].contains("t.customer_id = c.id"));
        assert!(submitted[0].contains("> 10000"));
        assert!(submitted[0].ends_with("LIMIT 100"));
        assert_eq!(response.citations.sql, submitted[0]);
        assert_eq!(response.citations.databases, vec!["acme_sales"]);

        let graph = &response.context_graph;
        assert_eq!(graph.nodes_of_type("Customer").count(), 1);
        assert_eq!(graph.nodes_of_type("Transaction").count(), 2);
        assert!(graph
            .edges
            .iter()
            .any(|e| e.source == "Transaction:10" && e.target == "Customer:1" && e.relation == "madeBy"));
        assert!(!response.reasoning_trace.is_empty());

        assert_eq!(response.execution_stats.rows_returned, 2);
        assert_eq!(response.execution_stats.databases_queried, 1);
        let names: Vec<&str> = response
            .execution_pipeline
            .steps
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![STEP_LOAD_CONTEXT, STEP_GENERATE, STEP_VALIDATE, STEP_EXECUTE, STEP_BUILD_GRAPH, STEP_ANSWER]
        );
        assert!(response
            .execution_pipeline
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Success));
    }

    #[tokio::test]
    async fn test_unknown_column_retries_with_feedback_then_fails() {
        let bad = plan_reply("SELECT customer_name FROM acme_sales.sales.customers");
        let llm = Arc::new(ScriptedLlm::replying(&[bad.as_str(), bad.as_str(), bad.as_str()]));
        let engine = Arc::new(ScriptedEngine::empty());

        let response = orchestrator(InMemoryOntologyStore::sales(), llm.clone(), engine.clone())
            .answer("acme", "ws1", "List customer names")
            .await;

        let error = response.error.as_deref().unwrap();
        assert!(error.contains("customer_name"));
        assert!(response.answer.starts_with("Failed after 3 attempts"));
        assert_eq!(response.execution_stats.error.as_deref(), Some(error));
        assert_eq!(steps_named(&response, STEP_GENERATE).len(), 3);
        assert!(steps_named(&response, STEP_VALIDATE)
            .iter()
            .all(|s| s.status == StepStatus::Failed));
        assert!(engine.submitted().is_empty());

        // Attempts 2 and 3 carry the validator feedback as correction turns
        let requests = llm.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].len(), 2);
        assert_eq!(requests[1].len(), 4);
        assert_eq!(requests[2].len(), 6);
        assert!(requests[1][3].content.contains("customer_name"));
    }

    #[tokio::test]
    async fn test_unreachable_engine_fails_every_execution() {
        let reply = plan_reply(SCENARIO_A_SQL);
        let llm = Arc::new(ScriptedLlm::replying(&[reply.as_str(), reply.as_str(), reply.as_str()]));

        let response = orchestrator(InMemoryOntologyStore::sales(), llm, Arc::new(UnreachableEngine))
            .answer("acme", "ws1", "Which customers made transactions over 10000?")
            .await;

        let executions = steps_named(&response, STEP_EXECUTE);
        assert_eq!(executions.len(), 3);
        assert!(executions
            .iter()
            .all(|s| s.status == StepStatus::Failed && s.error.as_deref().is_some_and(|e| !e.is_empty())));
        assert!(response.answer.contains("Failed after 3 attempts"));
        assert!(response.execution_stats.error.is_some());
        assert!(response.error.is_some());
        assert!(response.plan.is_some());
        assert!(!response.citations.sql.is_empty());
    }

    #[tokio::test]
    async fn test_recovers_on_second_attempt() {
        let bad = plan_reply("SELECT customer_name FROM acme_sales.sales.customers");
        let good = plan_reply("SELECT name FROM acme_sales.sales.customers");
        let llm = Arc::new(ScriptedLlm::replying(&[bad.as_str(), good.as_str(), "Ada is a customer."]));
        let engine = Arc::new(ScriptedEngine::paged(vec![result_page(&["name"], vec![vec![json!("Ada")]])]));

        let response = orchestrator(InMemoryOntologyStore::sales(), llm, engine)
            .answer("acme", "ws1", "List customer names")
            .await;

        assert!(response.error.is_none());
        assert_eq!(response.answer, "Ada is a customer.");
        let generations = steps_named(&response, STEP_GENERATE);
        assert_eq!(generations.len(), 2);
        assert_eq!(generations[1].attempt, Some(2));
        assert_eq!(steps_named(&response, STEP_VALIDATE)[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_context_load_failure_is_a_structured_response() {
        let llm = Arc::new(ScriptedLlm::replying(&[]));
        let response = orchestrator(InMemoryOntologyStore::failing(), llm.clone(), Arc::new(ScriptedEngine::empty()))
            .answer("acme", "ws1", "Anything?")
            .await;

        assert!(response.error.is_some());
        assert_eq!(response.execution_pipeline.steps[0].name, STEP_LOAD_CONTEXT);
        assert_eq!(response.execution_pipeline.steps[0].status, StepStatus::Failed);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_generation_failures_exhaust_attempts() {
        let llm = Arc::new(ScriptedLlm::replying(&["I am not sure.", "Still not sure.", "No idea."]));
        let response = orchestrator(InMemoryOntologyStore::sales(), llm, Arc::new(ScriptedEngine::empty()))
            .answer("acme", "ws1", "What?")
            .await;

        assert!(response.answer.starts_with("Failed after 3 attempts"));
        assert!(response.plan.is_none());
        assert!(response.citations.sql.is_empty());
        assert_eq!(
            steps_named(&response, STEP_GENERATE)
                .iter()
                .filter(|s| s.status == StepStatus::Failed)
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn test_graph_build_failure_still_answers() {
        let reply = plan_reply("SELECT name, segment FROM acme_sales.sales.customers");
        let llm = Arc::new(ScriptedLlm::replying(&[reply.as_str(), "Ada is a customer."]));
        // Second row is missing its segment value
        let engine = Arc::new(ScriptedEngine::paged(vec![result_page(
            &["name", "segment"],
            vec![vec![json!("Ada"), json!("SMB")], vec![json!("Grace")]],
        )]));

        let response = orchestrator(InMemoryOntologyStore::sales(), llm, engine)
            .answer("acme", "ws1", "List customers")
            .await;

        assert!(response.error.is_none(), "{:?}", response.error);
        assert_eq!(response.answer, "Ada is a customer.");
        let graph_steps = steps_named(&response, STEP_BUILD_GRAPH);
        assert_eq!(graph_steps.len(), 1);
        assert_eq!(graph_steps[0].status, StepStatus::Failed);
        assert_eq!(steps_named(&response, STEP_ANSWER)[0].status, StepStatus::Success);
        assert!(response.context_graph.nodes.is_empty());
        assert!(response.reasoning_trace.is_empty());
        assert_eq!(response.execution_stats.rows_returned, 2);
    }

    #[tokio::test]
    async fn test_drift_warnings_reach_the_response() {
        // The live catalog has lost the transactions table
        let live: Vec<CatalogTable> = sales_catalog_tables().into_iter().take(1).collect();
        let drifted = |w: &String| w.starts_with("Schema drift:") && w.contains("acme_sales.sales.transactions");

        let good = plan_reply("SELECT name FROM acme_sales.sales.customers");
        let llm = Arc::new(ScriptedLlm::replying(&[good.as_str(), "Ada is a customer."]));
        let engine: Arc<dyn FederationEngine> =
            Arc::new(ScriptedEngine::paged(vec![result_page(&["name"], vec![vec![json!("Ada")]])]));
        let response = orchestrator_with(InMemoryOntologyStore::sales(), llm, engine_pool(engine), live.clone())
            .answer("acme", "ws1", "List customer names")
            .await;
        assert!(response.error.is_none());
        assert!(response.warnings.iter().any(drifted), "{:?}", response.warnings);

        let bad = plan_reply("SELECT customer_name FROM acme_sales.sales.customers");
        let llm = Arc::new(ScriptedLlm::replying(&[bad.as_str(), bad.as_str(), bad.as_str()]));
        let engine: Arc<dyn FederationEngine> = Arc::new(ScriptedEngine::empty());
        let response = orchestrator_with(InMemoryOntologyStore::sales(), llm, engine_pool(engine), live)
            .answer("acme", "ws1", "List customer names")
            .await;
        assert!(response.error.is_some());
        assert!(response.warnings.iter().any(drifted), "{:?}", response.warnings);
    }

    #[tokio::test]
    async fn test_zero_rows_are_explained_with_sampled_values() {
        let reply = plan_reply("SELECT c.name FROM acme_sales.sales.customers c WHERE c.segment = 'Retail'");
        let llm = Arc::new(ScriptedLlm::replying(&[
            reply.as_str(),
            "No customer is in the Retail segment; most are SMB.",
        ]));
        let engine = Arc::new(ScriptedEngine::responding(|sql| {
            if sql.contains("total_rows") {
                Ok(result_page(&["total_rows"], vec![vec![json!(3)]]))
            } else if sql.contains("value_count") {
                Ok(result_page(&["segment", "value_count"], vec![vec![json!("SMB"), json!(3)]]))
            } else {
                Ok(result_page(&["name"], vec![]))
            }
        }));

        let response = orchestrator(InMemoryOntologyStore::sales(), llm.clone(), engine.clone())
            .answer("acme", "ws1", "Which customers are in retail?")
            .await;

        assert!(response.error.is_none(), "{:?}", response.error);
        assert_eq!(response.execution_stats.rows_returned, 0);
        assert_eq!(response.answer, "No customer is in the Retail segment; most are SMB.");
        let submitted = engine.submitted();
        assert_eq!(submitted.len(), 3, "{:?}", submitted);
        assert!(submitted[1].contains("GROUP BY segment"));
        assert!(llm.requests()[1][1].content.contains("'SMB' (3)"));
        assert_eq!(steps_named(&response, STEP_ANSWER)[0].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_unrecoverable_engine_error_stops_retrying() {
        let reply = plan_reply(SCENARIO_A_SQL);
        let llm = Arc::new(ScriptedLlm::replying(&[reply.as_str(), reply.as_str(), reply.as_str()]));
        let pool = Arc::new(EngineClientPool::with_factory(Arc::new(
            |_ws: &str| -> Result<Arc<dyn FederationEngine>, AppError> {
                Err(AppError::Validation("Invalid engine URL".into()))
            },
        )));

        let response = orchestrator_with(InMemoryOntologyStore::sales(), llm.clone(), pool, sales_catalog_tables())
            .answer("acme", "ws1", "Which customers made transactions over 10000?")
            .await;

        assert_eq!(llm.calls(), 1);
        assert_eq!(steps_named(&response, STEP_GENERATE).len(), 1);
        assert_eq!(steps_named(&response, STEP_EXECUTE)[0].status, StepStatus::Failed);
        assert!(response.answer.starts_with("Failed after 1 attempt to answer"));
        assert!(response.error.as_deref().unwrap().contains("Invalid engine URL"));
    }

    #[tokio::test]
    async fn test_partial_table_name_is_corrected_on_retry() {
        let partial = plan_reply("SELECT name FROM sales.customers");
        let full = plan_reply("SELECT name FROM acme_sales.sales.customers");
        let llm = Arc::new(ScriptedLlm::replying(&[partial.as_str(), full.as_str(), "Ada is a customer."]));
        let engine = Arc::new(ScriptedEngine::paged(vec![result_page(&["name"], vec![vec![json!("Ada")]])]));

        let response = orchestrator(InMemoryOntologyStore::sales(), llm.clone(), engine.clone())
            .answer("acme", "ws1", "List customer names")
            .await;

        assert!(response.error.is_none());
        assert_eq!(engine.submitted().len(), 1);
        assert!(engine.submitted()[0].contains("FROM acme_sales.sales.customers"));
        assert!(llm.requests()[1][3].content.contains("use acme_sales.sales.customers"));
    }
}
