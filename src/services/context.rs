// Service Context
//
// Everything a request needs, wired once at startup and shared through axum
// state: storage, engine clients, LLM client, schema cache and the assembled
// query pipeline.

use std::sync::Arc;
use std::time::Duration;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::services::catalog_registry::TrinoCatalogRegistry;
use crate::services::engine::EngineClientPool;
use crate::services::llm_service::{LlmClient, LlmService};
use crate::services::schema_cache::{CacheStore, MemoryCacheStore, SchemaCache};
use crate::services::vkg::{
    AnswerGenerator, ContextGraphBuilder, ContextLoader, DataExplorer, DriftDetector, PlanSqlGenerator,
    QueryExecutor, RegexFilterExtractor, VkgOrchestrator,
};
use crate::storage::SqliteStorage;

pub struct ServiceContext {
    pub config: Config,
    pub storage: Arc<SqliteStorage>,
    pub engines: Arc<EngineClientPool>,
    pub llm: Arc<dyn LlmClient>,
    pub schema_cache: Arc<SchemaCache>,
    pub executor: Arc<QueryExecutor>,
    pub catalogs: Arc<TrinoCatalogRegistry>,
    pub orchestrator: Arc<VkgOrchestrator>,
}

impl ServiceContext {
    /// Open storage and build the production collaborators
    pub async fn new(config: Config) -> Result<Self, AppError> {
        let storage = Arc::new(SqliteStorage::new(&config.database.url).await?);
        let engines = Arc::new(EngineClientPool::new(config.engine.clone()));
        let llm = LlmService::new(&config);
        if !llm.is_configured() {
            tracing::warn!("LLM gateway not configured; plan generation will fail until LLM_GATEWAY_URL is set");
        }
        let context = Self::from_parts(config, storage, engines, Arc::new(llm));
        if let Err(e) = context.schema_cache.purge_expired().await {
            tracing::warn!("Failed to purge expired schema cache entries: {}", e);
        }
        Ok(context)
    }

    /// Wire the pipeline over the given storage, engine pool and LLM client
    pub fn from_parts(
        config: Config,
        storage: Arc<SqliteStorage>,
        engines: Arc<EngineClientPool>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let cache_store: Arc<dyn CacheStore> = match config.pipeline.schema_cache_backend.as_str() {
            "memory" => Arc::new(MemoryCacheStore::default()),
            "sqlite" => storage.clone(),
            other => {
                tracing::warn!("Unknown schema cache backend '{}', using sqlite", other);
                storage.clone()
            }
        };
        let schema_cache = Arc::new(SchemaCache::new(
            cache_store,
            Duration::from_secs(config.pipeline.schema_cache_ttl_secs),
        ));

        let executor = Arc::new(QueryExecutor::new(engines.clone(), &config.engine));
        let catalogs = Arc::new(TrinoCatalogRegistry::new(storage.clone(), executor.clone()));

        let context_loader = Arc::new(ContextLoader::new(
            storage.clone(),
            storage.clone(),
            catalogs.clone(),
            schema_cache.clone(),
        ));
        let generator = Arc::new(PlanSqlGenerator::new(llm.clone(), config.pipeline.default_row_limit));
        let explorer = DataExplorer::new(
            Arc::new(RegexFilterExtractor),
            executor.clone(),
            config.pipeline.exploration_limit,
        );
        let answer_generator = Arc::new(AnswerGenerator::new(
            llm.clone(),
            explorer,
            config.pipeline.answer_sample_rows,
        ));
        let drift_detector = Arc::new(DriftDetector::new(catalogs.clone()));

        let orchestrator = Arc::new(VkgOrchestrator::new(
            context_loader,
            generator,
            executor.clone(),
            Arc::new(ContextGraphBuilder),
            answer_generator,
            drift_detector,
        ));

        Self {
            config,
            storage,
            engines,
            llm,
            schema_cache,
            executor,
            catalogs,
            orchestrator,
        }
    }

    /// Release engine clients and expired cache rows
    pub async fn shutdown(&self) {
        let clients = self.engines.client_count().await;
        self.engines.clear().await;
        if let Err(e) = self.schema_cache.purge_expired().await {
            tracing::warn!("Failed to purge schema cache on shutdown: {}", e);
        }
        tracing::info!("Service context shut down ({} engine client(s) released)", clients);
    }
}
