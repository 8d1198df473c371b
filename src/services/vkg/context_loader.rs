// Context Loader
//
// Builds the per-(tenant, workspace) OntologyContext: schema and annotation
// reads run concurrently, annotations are resolved against the registered
// catalogs, and the result is cached read-through.

use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{OntologyContext, OntologySchema, OntologyScope};
use crate::services::catalog_registry::CatalogRegistry;
use crate::services::ontology_store::{MappingAnnotationStore, OntologyStore};
use crate::services::schema_cache::SchemaCache;
use crate::services::vkg::schema_filter::filter_schema;
use crate::services::vkg::table_resolver::MappingResolver;

pub struct ContextLoader {
    ontology: Arc<dyn OntologyStore>,
    annotations: Arc<dyn MappingAnnotationStore>,
    resolver: MappingResolver,
    cache: Arc<SchemaCache>,
    scope: OntologyScope,
}

impl ContextLoader {
    pub fn new(
        ontology: Arc<dyn OntologyStore>,
        annotations: Arc<dyn MappingAnnotationStore>,
        registry: Arc<dyn CatalogRegistry>,
        cache: Arc<SchemaCache>,
    ) -> Self {
        Self {
            ontology,
            annotations,
            resolver: MappingResolver::new(registry),
            cache,
            scope: OntologyScope { include_shared: true },
        }
    }

    pub async fn load(&self, tenant_id: &str, workspace_id: &str) -> Result<OntologyContext, AppError> {
        if let Some(context) = self.cache.get(tenant_id, workspace_id).await {
            tracing::debug!("Schema cache hit for {}/{}", tenant_id, workspace_id);
            return Ok(context);
        }
        tracing::debug!("Schema cache miss for {}/{}", tenant_id, workspace_id);

        let context = self.build(tenant_id, workspace_id).await?;
        self.cache.put(tenant_id, workspace_id, &context).await;
        Ok(context)
    }

    /// Drop the cached context so the next load rebuilds it
    pub async fn invalidate(&self, tenant_id: &str, workspace_id: &str) -> Result<bool, AppError> {
        self.cache.invalidate(tenant_id, workspace_id).await
    }

    async fn build(&self, tenant_id: &str, workspace_id: &str) -> Result<OntologyContext, AppError> {
        let workspace_name = match self.ontology.workspace_name(tenant_id, workspace_id).await {
            Ok(Some(name)) => name,
            Ok(None) => workspace_id.to_string(),
            Err(e) => {
                tracing::warn!("Failed to read name of workspace {}: {}", workspace_id, e);
                workspace_id.to_string()
            }
        };

        let (classes, object_properties, data_properties, annotations) = tokio::try_join!(
            self.ontology.get_classes(tenant_id, workspace_id, self.scope),
            self.ontology.get_object_properties(tenant_id, workspace_id, self.scope),
            self.ontology.get_data_properties(tenant_id, workspace_id, self.scope),
            self.annotations
                .get_mapping_annotations(tenant_id, workspace_id, &workspace_name),
        )?;

        let schema = OntologySchema {
            classes,
            object_properties,
            data_properties,
        }
        .attach_properties();

        let mappings = self.resolver.resolve(tenant_id, workspace_id, annotations).await;
        let filtered_schema = filter_schema(&schema, &mappings);

        tracing::info!(
            "Loaded ontology context for {}/{}: {} class(es), {} mapped, {} relationship mapping(s)",
            tenant_id,
            workspace_id,
            schema.classes.len(),
            mappings.classes.len(),
            mappings.relationships.len()
        );

        Ok(OntologyContext {
            workspace_name,
            schema,
            filtered_schema,
            mappings,
        })
    }
}
