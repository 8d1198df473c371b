// Catalog Registry
//
// One engine catalog per registered external database, named per tenant.
// Introspection reads the catalog's information_schema through the engine
// and infers foreign keys from column naming.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{
    catalog_name_for, CatalogColumn, CatalogEntry, CatalogIntrospection, CatalogTable, ExecutionResult,
    RegisterCatalogRequest,
};
use crate::services::engine::mask_credentials;
use crate::services::vkg::query_executor::QueryExecutor;
use crate::services::vkg::sql_fragment::quote_ident;
use crate::storage::SqliteStorage;

#[async_trait]
pub trait CatalogRegistry: Send + Sync {
    async fn list_catalogs(&self, tenant_id: &str, workspace_id: &str) -> Result<Vec<CatalogEntry>, AppError>;

    async fn introspect_catalog(
        &self,
        tenant_id: &str,
        catalog_name: &str,
        workspace_id: &str,
    ) -> Result<CatalogIntrospection, AppError>;
}

/// Registry backed by SQLite for registrations and the engine for introspection
pub struct TrinoCatalogRegistry {
    storage: Arc<SqliteStorage>,
    executor: Arc<QueryExecutor>,
}

impl TrinoCatalogRegistry {
    pub fn new(storage: Arc<SqliteStorage>, executor: Arc<QueryExecutor>) -> Self {
        Self { storage, executor }
    }

    /// Create the engine catalog and persist the registration. The first
    /// introspection runs immediately; its failure does not undo registration.
    pub async fn register_catalog(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        request: RegisterCatalogRequest,
    ) -> Result<CatalogEntry, AppError> {
        request.validate().map_err(AppError::Validation)?;

        let catalog_name = catalog_name_for(tenant_id, &request.database_name);
        if self.storage.get_catalog(tenant_id, &catalog_name).await?.is_some() {
            return Err(AppError::Validation(format!(
                "Catalog {} is already registered",
                catalog_name
            )));
        }

        tracing::info!(
            "Registering catalog {} ({} at {}) for workspace {}",
            catalog_name,
            request.connector,
            mask_connection_url(&request.connection_url),
            workspace_id
        );

        let ddl = create_catalog_statement(&catalog_name, &request);
        self.executor
            .execute(workspace_id, &ddl)
            .await
            .map_err(|e| AppError::Connection(format!("Failed to create catalog {}: {}", catalog_name, e)))?;

        let mut entry = CatalogEntry::new(
            tenant_id.to_string(),
            workspace_id.to_string(),
            catalog_name,
            request.database_name.clone(),
            request.connector.clone(),
            request.connection_url.clone(),
        );

        match self.introspect(&entry).await {
            Ok(introspection) => entry.mark_refreshed(introspection),
            Err(e) => tracing::warn!("Initial introspection of {} failed: {}", entry.catalog_name, e),
        }

        self.storage.save_catalog(&entry).await?;
        Ok(entry)
    }

    /// Re-introspect a registered catalog and store the result
    pub async fn refresh_catalog(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        catalog_name: &str,
    ) -> Result<CatalogEntry, AppError> {
        let mut entry = self.registered(tenant_id, workspace_id, catalog_name).await?;
        let introspection = self.introspect(&entry).await?;
        tracing::info!(
            "Refreshed catalog {}: {} table(s), {} foreign key(s)",
            catalog_name,
            introspection.tables.len(),
            introspection.relationships.len()
        );
        entry.mark_refreshed(introspection);
        self.storage.save_catalog(&entry).await?;
        Ok(entry)
    }

    /// Drop the engine catalog and forget the registration. A failed DROP is
    /// logged; the registration is removed regardless.
    pub async fn unregister_catalog(&self, tenant_id: &str, workspace_id: &str, catalog_name: &str) -> Result<(), AppError> {
        let entry = self.registered(tenant_id, workspace_id, catalog_name).await?;
        let ddl = format!("DROP CATALOG {}", quote_ident(&entry.catalog_name));
        if let Err(e) = self.executor.execute(workspace_id, &ddl).await {
            tracing::warn!("Failed to drop engine catalog {}: {}", entry.catalog_name, e);
        }
        self.storage.delete_catalog(tenant_id, catalog_name).await?;
        tracing::info!("Unregistered catalog {} from workspace {}", catalog_name, workspace_id);
        Ok(())
    }

    async fn registered(&self, tenant_id: &str, workspace_id: &str, catalog_name: &str) -> Result<CatalogEntry, AppError> {
        match self.storage.get_catalog(tenant_id, catalog_name).await? {
            Some(entry) if entry.workspace_id == workspace_id => Ok(entry),
            _ => Err(AppError::NotFound(format!(
                "Catalog {} not registered in workspace {}",
                catalog_name, workspace_id
            ))),
        }
    }

    async fn introspect(&self, entry: &CatalogEntry) -> Result<CatalogIntrospection, AppError> {
        let sql = introspection_query(&entry.catalog_name);
        let result = self.executor.execute(&entry.workspace_id, &sql).await?;
        let tables = tables_from_result(&entry.catalog_name, &result);
        Ok(CatalogIntrospection::new(entry.catalog_name.clone(), tables))
    }
}

#[async_trait]
impl CatalogRegistry for TrinoCatalogRegistry {
    async fn list_catalogs(&self, tenant_id: &str, workspace_id: &str) -> Result<Vec<CatalogEntry>, AppError> {
        Ok(self.storage.list_catalogs(tenant_id, workspace_id).await?)
    }

    async fn introspect_catalog(
        &self,
        tenant_id: &str,
        catalog_name: &str,
        workspace_id: &str,
    ) -> Result<CatalogIntrospection, AppError> {
        let entry = self.registered(tenant_id, workspace_id, catalog_name).await?;
        self.introspect(&entry).await
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

pub fn create_catalog_statement(catalog_name: &str, request: &RegisterCatalogRequest) -> String {
    let mut properties = vec![format!(
        "\"connection-url\" = '{}'",
        escape_literal(&request.connection_url)
    )];
    if let Some(user) = &request.user {
        properties.push(format!("\"connection-user\" = '{}'", escape_literal(user)));
    }
    if let Some(password) = &request.password {
        properties.push(format!("\"connection-password\" = '{}'", escape_literal(password)));
    }
    format!(
        "CREATE CATALOG {} USING {} WITH ({})",
        quote_ident(catalog_name),
        request.connector,
        properties.join(", ")
    )
}

pub fn introspection_query(catalog_name: &str) -> String {
    format!(
        "SELECT table_schema, table_name, column_name, data_type, is_nullable \
         FROM {}.information_schema.columns \
         WHERE table_schema <> 'information_schema' \
         ORDER BY table_schema, table_name, ordinal_position",
        quote_ident(catalog_name)
    )
}

/// Group information_schema rows into tables, preserving column order
fn tables_from_result(catalog_name: &str, result: &ExecutionResult) -> Vec<CatalogTable> {
    let text = |row: &[serde_json::Value], idx: usize| -> String {
        row.get(idx).and_then(|v| v.as_str()).unwrap_or_default().to_string()
    };

    let mut grouped: BTreeMap<(String, String), Vec<CatalogColumn>> = BTreeMap::new();
    for row in &result.rows {
        let schema = text(row, 0);
        let table = text(row, 1);
        let column = text(row, 2);
        if schema.is_empty() || table.is_empty() || column.is_empty() {
            continue;
        }
        grouped.entry((schema, table)).or_default().push(CatalogColumn {
            name: column,
            data_type: text(row, 3),
            is_nullable: !text(row, 4).eq_ignore_ascii_case("NO"),
        });
    }

    grouped
        .into_iter()
        .map(|((schema, name), columns)| CatalogTable {
            catalog: catalog_name.to_string(),
            schema,
            name,
            columns,
        })
        .collect()
}

/// Mask credentials, including inside `jdbc:` URLs
pub fn mask_connection_url(url: &str) -> String {
    match url.strip_prefix("jdbc:") {
        Some(inner) => format!("jdbc:{}", mask_credentials(inner)),
        None => mask_credentials(url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResultColumn;
    use serde_json::json;

    fn request() -> RegisterCatalogRequest {
        RegisterCatalogRequest {
            database_name: "sales".into(),
            connector: "postgresql".into(),
            connection_url: "jdbc:postgresql://db:5432/sales".into(),
            user: Some("reader".into()),
            password: Some("o'secret".into()),
        }
    }

    #[test]
    fn test_create_catalog_statement() {
        let ddl = create_catalog_statement("acme_sales", &request());
        assert!(ddl.starts_with("CREATE CATALOG acme_sales USING postgresql WITH ("));
        assert!(ddl.contains("\"connection-url\" = 'jdbc:postgresql://db:5432/sales'"));
        assert!(ddl.contains("\"connection-password\" = 'o''secret'"));
    }

    #[test]
    fn test_introspection_query_targets_catalog() {
        let sql = introspection_query("acme_sales");
        assert!(sql.contains("FROM acme_sales.information_schema.columns"));
    }

    #[test]
    fn test_tables_from_result_groups_columns() {
        let result = ExecutionResult {
            columns: ["table_schema", "table_name", "column_name", "data_type", "is_nullable"]
                .iter()
                .map(|c| ResultColumn {
                    name: c.to_string(),
                    data_type: "varchar".into(),
                })
                .collect(),
            rows: vec![
                vec![json!("sales"), json!("customers"), json!("id"), json!("bigint"), json!("NO")],
                vec![json!("sales"), json!("customers"), json!("name"), json!("varchar"), json!("YES")],
                vec![json!("sales"), json!("transactions"), json!("id"), json!("bigint"), json!("NO")],
                vec![json!("sales"), json!("transactions"), json!("customer_id"), json!("bigint"), json!("YES")],
            ],
            row_count: 4,
            duration_ms: 1,
            engine_execution_ms: None,
        };
        let tables = tables_from_result("acme_sales", &result);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].qualified_name(), "acme_sales.sales.customers");
        assert!(!tables[0].columns[0].is_nullable);

        let introspection = CatalogIntrospection::new("acme_sales".into(), tables);
        assert_eq!(introspection.relationships.len(), 1);
        assert_eq!(introspection.relationships[0].from_column, "customer_id");
    }

    #[test]
    fn test_mask_jdbc_url() {
        let masked = mask_connection_url("jdbc:postgresql://user:secret@db:5432/sales");
        assert!(masked.starts_with("jdbc:"));
        assert!(!masked.contains("secret"));
    }
}
