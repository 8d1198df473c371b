// VKG Query Pipeline
//
// Question -> ontology context -> plan + SQL -> validation -> federated
// execution -> context graph -> answer, with bounded self-correction and a
// concurrent schema drift check.

// Physical mapping resolution
pub mod sql_fragment; // TableRef, ColumnRef, JoinCondition, exploration queries
pub mod table_resolver; // two-part -> three-part table names
pub mod join_augmenter; // foreign-key driven join correction
pub mod schema_filter;
pub mod context_loader; // cached OntologyContext per tenant/workspace

// Pipeline stages
pub mod sql_generator;
pub mod query_executor;
pub mod graph_builder;
pub mod sql_heuristics; // FilterExtractor
pub mod data_explorer;
pub mod answer_generator;
pub mod drift_detector;
pub mod orchestrator;

#[cfg(test)]
pub mod test_support;

pub use answer_generator::AnswerGenerator;
pub use context_loader::ContextLoader;
pub use data_explorer::DataExplorer;
pub use drift_detector::DriftDetector;
pub use graph_builder::{ContextGraphBuilder, GraphBuild};
pub use orchestrator::{VkgOrchestrator, MAX_ATTEMPTS};
pub use query_executor::QueryExecutor;
pub use sql_generator::{GeneratedQuery, PlanSqlGenerator};
pub use sql_heuristics::{FilterColumn, FilterExtractor, RegexFilterExtractor};
