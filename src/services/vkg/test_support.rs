// Scripted collaborators and the customers/transactions fixture used by the
// pipeline tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::api::middleware::AppError;
use crate::models::{
    CatalogColumn, CatalogEntry, CatalogIntrospection, CatalogTable, ClassMapping, DataProperty, MappingSet,
    ObjectProperty, OntologyClass, OntologyImport, OntologySchema, OntologyScope, PropertyMapping,
    RelationshipMapping, ResultColumn,
};
use crate::services::catalog_registry::CatalogRegistry;
use crate::services::engine::{EngineClientPool, FederationEngine, StatementPage, StatementStats};
use crate::services::llm_service::{ChatMessage, ChatOptions, LlmClient};
use crate::services::ontology_store::{MappingAnnotationStore, OntologyStore};

// ==================== Fixture ====================

fn columns(names: &[&str]) -> Vec<CatalogColumn> {
    names
        .iter()
        .map(|name| CatalogColumn {
            name: name.to_string(),
            data_type: if name.ends_with("id") { "bigint" } else { "varchar" }.to_string(),
            is_nullable: *name != "id",
        })
        .collect()
}

/// Live view of `acme_sales`: customers and transactions
pub fn sales_catalog_tables() -> Vec<CatalogTable> {
    let table = |name: &str, cols: &[&str]| CatalogTable {
        catalog: "acme_sales".into(),
        schema: "sales".into(),
        name: name.into(),
        columns: columns(cols),
    };
    vec![
        table("customers", &["id", "name", "segment"]),
        table("transactions", &["id", "customer_id", "amount", "transaction_date"]),
    ]
}

pub fn sales_catalogs() -> Vec<CatalogEntry> {
    vec![CatalogEntry::new(
        "acme".into(),
        "ws1".into(),
        "acme_sales".into(),
        "sales".into(),
        "postgresql".into(),
        "jdbc:postgresql://db:5432/sales".into(),
    )]
}

pub fn sales_schema() -> OntologySchema {
    let data = |name: &str, domain: &str, range: &str| DataProperty {
        name: name.into(),
        label: None,
        domain: domain.into(),
        range: range.into(),
        description: None,
    };
    OntologySchema {
        classes: vec![
            OntologyClass::new("Customer"),
            OntologyClass::new("Transaction"),
            OntologyClass::new("Product"),
        ],
        object_properties: vec![ObjectProperty {
            name: "madeBy".into(),
            label: Some("made by".into()),
            domain: "Transaction".into(),
            range: "Customer".into(),
            description: None,
        }],
        data_properties: vec![
            data("customerName", "Customer", "string"),
            data("customerSegment", "Customer", "string"),
            data("amount", "Transaction", "decimal"),
            data("transactionDate", "Transaction", "date"),
            data("productName", "Product", "string"),
        ],
    }
}

fn mappings_with(prefix: &str, join: &str) -> MappingSet {
    let customers = format!("{}sales.customers", prefix);
    let transactions = format!("{}sales.transactions", prefix);
    let prop = |name: &str, domain: &str, table: &str, column: &str, data_type: &str| PropertyMapping {
        property_name: name.into(),
        domain_class: domain.into(),
        source_table: table.to_string(),
        source_column: column.into(),
        data_type: data_type.into(),
    };
    MappingSet {
        classes: vec![
            ClassMapping {
                class_name: "Customer".into(),
                source_table: customers.clone(),
                primary_key: Some("id".into()),
            },
            ClassMapping {
                class_name: "Transaction".into(),
                source_table: transactions.clone(),
                primary_key: Some("id".into()),
            },
        ],
        properties: vec![
            prop("customerName", "Customer", &customers, "name", "string"),
            prop("customerSegment", "Customer", &customers, "segment", "string"),
            prop("amount", "Transaction", &transactions, "amount", "decimal"),
            prop("transactionDate", "Transaction", &transactions, "transaction_date", "date"),
        ],
        relationships: vec![RelationshipMapping {
            name: "madeBy".into(),
            domain_class: "Transaction".into(),
            range_class: "Customer".into(),
            join_condition: join.to_string(),
            synthesized: false,
        }],
    }
}

/// Annotations as stored: two-part table names
pub fn sales_annotations() -> MappingSet {
    mappings_with("", "sales.transactions.customer_id = sales.customers.id")
}

/// Annotations after resolution against the `acme_sales` catalog
pub fn sales_mappings() -> MappingSet {
    mappings_with(
        "acme_sales.",
        "acme_sales.sales.transactions.customer_id = acme_sales.sales.customers.id",
    )
}

pub fn sales_import() -> OntologyImport {
    let schema = sales_schema();
    OntologyImport {
        workspace_name: Some("Sales".into()),
        classes: schema.classes,
        object_properties: schema.object_properties,
        data_properties: schema.data_properties,
        mappings: sales_annotations(),
    }
}

// ==================== Catalog registry ====================

pub struct ScriptedCatalogRegistry {
    catalogs: Vec<CatalogEntry>,
    tables: Vec<CatalogTable>,
    fail: bool,
    introspections: AtomicUsize,
}

impl ScriptedCatalogRegistry {
    pub fn new(catalogs: Vec<CatalogEntry>, tables: Vec<CatalogTable>) -> Self {
        Self {
            catalogs,
            tables,
            fail: false,
            introspections: AtomicUsize::new(0),
        }
    }

    /// Registry whose every call fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![], vec![])
        }
    }

    pub fn introspection_calls(&self) -> usize {
        self.introspections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogRegistry for ScriptedCatalogRegistry {
    async fn list_catalogs(&self, _tenant_id: &str, _workspace_id: &str) -> Result<Vec<CatalogEntry>, AppError> {
        if self.fail {
            return Err(AppError::Database("catalog store unavailable".into()));
        }
        Ok(self.catalogs.clone())
    }

    async fn introspect_catalog(
        &self,
        _tenant_id: &str,
        catalog_name: &str,
        _workspace_id: &str,
    ) -> Result<CatalogIntrospection, AppError> {
        self.introspections.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::Connection(format!("catalog {} unreachable", catalog_name)));
        }
        let tables = self
            .tables
            .iter()
            .filter(|t| t.catalog == catalog_name)
            .cloned()
            .collect();
        Ok(CatalogIntrospection::new(catalog_name.to_string(), tables))
    }
}

// ==================== Engine ====================

pub fn page(columns: Option<&[&str]>, data: Option<Vec<Vec<Value>>>, next_uri: Option<&str>) -> StatementPage {
    StatementPage {
        id: Some("q1".into()),
        next_uri: next_uri.map(str::to_string),
        columns: columns.map(|names| {
            names
                .iter()
                .map(|n| ResultColumn {
                    name: n.to_string(),
                    data_type: "varchar".into(),
                })
                .collect()
        }),
        data,
        stats: Some(StatementStats {
            state: if next_uri.is_some() { "RUNNING" } else { "FINISHED" }.into(),
            elapsed_time_millis: Some(3),
        }),
        error: None,
    }
}

/// Single final page with the given result
pub fn result_page(columns: &[&str], rows: Vec<Vec<Value>>) -> StatementPage {
    page(Some(columns), Some(rows), None)
}

type Responder = Box<dyn Fn(&str) -> Result<StatementPage, AppError> + Send + Sync>;

enum Script {
    Pages(Mutex<VecDeque<StatementPage>>),
    Endless,
    Respond(Responder),
}

/// Engine replaying scripted pages and recording every submitted statement
pub struct ScriptedEngine {
    script: Script,
    submitted: Mutex<Vec<String>>,
    polls: AtomicUsize,
}

impl ScriptedEngine {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            submitted: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }

    /// First page returned on submit, the rest on successive polls
    pub fn paged(pages: Vec<StatementPage>) -> Self {
        Self::with_script(Script::Pages(Mutex::new(pages.into())))
    }

    pub fn empty() -> Self {
        Self::paged(vec![result_page(&[], vec![])])
    }

    /// Every page points at another one
    pub fn never_finishes() -> Self {
        Self::with_script(Script::Endless)
    }

    /// Answer each statement from a closure over its SQL text
    pub fn responding(f: impl Fn(&str) -> Result<StatementPage, AppError> + Send + Sync + 'static) -> Self {
        Self::with_script(Script::Respond(Box::new(f)))
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn next_page(&self) -> Result<StatementPage, AppError> {
        match &self.script {
            Script::Pages(pages) => pages
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AppError::Execution("script exhausted".into())),
            Script::Endless => Ok(page(None, None, Some("http://engine/v1/statement/executing/1"))),
            Script::Respond(_) => Err(AppError::Execution("responder engines never poll".into())),
        }
    }
}

#[async_trait]
impl FederationEngine for ScriptedEngine {
    async fn submit(&self, sql: &str) -> Result<StatementPage, AppError> {
        self.submitted.lock().unwrap().push(sql.to_string());
        match &self.script {
            Script::Respond(f) => f(sql),
            _ => self.next_page(),
        }
    }

    async fn poll(&self, _next_uri: &str) -> Result<StatementPage, AppError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.next_page()
    }

    fn engine_type(&self) -> &str {
        "scripted"
    }
}

/// Engine whose coordinator cannot be reached
pub struct UnreachableEngine;

#[async_trait]
impl FederationEngine for UnreachableEngine {
    async fn submit(&self, _sql: &str) -> Result<StatementPage, AppError> {
        Err(AppError::Execution(
            "Failed to reach Trino at http://127.0.0.1:1: connection refused".into(),
        ))
    }

    async fn poll(&self, _next_uri: &str) -> Result<StatementPage, AppError> {
        Err(AppError::Execution("Failed to poll Trino: connection refused".into()))
    }

    fn engine_type(&self) -> &str {
        "unreachable"
    }
}

/// Pool that hands out the same engine for every workspace
pub fn engine_pool(engine: Arc<dyn FederationEngine>) -> Arc<EngineClientPool> {
    Arc::new(EngineClientPool::with_factory(Arc::new(move |_ws: &str| Ok(engine.clone()))))
}

// ==================== LLM ====================

/// Replays canned completions in order and records each request
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String, AppError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, messages: &[ChatMessage], _options: &ChatOptions) -> Result<String, AppError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::LlmService("script exhausted".into())))
    }
}

// ==================== Ontology stores ====================

pub struct InMemoryOntologyStore {
    schema: OntologySchema,
    mappings: MappingSet,
    fail: bool,
    loads: AtomicUsize,
}

impl InMemoryOntologyStore {
    pub fn new(schema: OntologySchema, mappings: MappingSet) -> Self {
        Self {
            schema,
            mappings,
            fail: false,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn sales() -> Self {
        Self::new(sales_schema(), sales_annotations())
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(OntologySchema::default(), MappingSet::default())
        }
    }

    /// Number of mapping annotation loads served
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), AppError> {
        if self.fail {
            Err(AppError::Database("ontology store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl OntologyStore for InMemoryOntologyStore {
    async fn get_classes(&self, _t: &str, _w: &str, _scope: OntologyScope) -> Result<Vec<OntologyClass>, AppError> {
        self.check()?;
        Ok(self.schema.classes.clone())
    }

    async fn get_object_properties(
        &self,
        _t: &str,
        _w: &str,
        _scope: OntologyScope,
    ) -> Result<Vec<ObjectProperty>, AppError> {
        self.check()?;
        Ok(self.schema.object_properties.clone())
    }

    async fn get_data_properties(&self, _t: &str, _w: &str, _scope: OntologyScope) -> Result<Vec<DataProperty>, AppError> {
        self.check()?;
        Ok(self.schema.data_properties.clone())
    }

    async fn workspace_name(&self, _t: &str, _w: &str) -> Result<Option<String>, AppError> {
        Ok(Some("Sales".into()))
    }
}

#[async_trait]
impl MappingAnnotationStore for InMemoryOntologyStore {
    async fn get_mapping_annotations(&self, _t: &str, _w: &str, _name: &str) -> Result<MappingSet, AppError> {
        self.check()?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.mappings.clone())
    }
}
