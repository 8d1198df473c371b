use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::api::middleware::AppError;
use crate::models::{
    CatalogEntry, DataProperty, MappingSet, ObjectProperty, OntologyClass, OntologyImport, OntologyScope,
};
use crate::services::ontology_store::{MappingAnnotationStore, OntologyStore};
use crate::services::schema_cache::CacheStore;

/// Workspace id under which tenant-wide shared ontology elements are stored
pub const SHARED_WORKSPACE: &str = "*";

const KIND_CLASS: &str = "class";
const KIND_OBJECT_PROPERTY: &str = "object_property";
const KIND_DATA_PROPERTY: &str = "data_property";

const MAPPING_CLASS: &str = "class";
const MAPPING_PROPERTY: &str = "property";
const MAPPING_RELATIONSHIP: &str = "relationship";

/// SQLite storage for catalogs, ontology elements, mapping annotations and the schema cache
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            let mut cleaned = path_str.trim_start_matches("sqlite:");
            cleaned = cleaned.trim_start_matches("//");
            cleaned
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize database schema
    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workspaces (
                tenant_id TEXT NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, id)
            );

            CREATE TABLE IF NOT EXISTS catalogs (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                catalog_name TEXT NOT NULL,
                database_name TEXT NOT NULL,
                connector TEXT NOT NULL,
                connection_url TEXT NOT NULL,
                created_at TEXT NOT NULL,
                refreshed_at TEXT,
                introspection_json TEXT,
                UNIQUE (tenant_id, catalog_name)
            );

            CREATE TABLE IF NOT EXISTS ontology_elements (
                tenant_id TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (tenant_id, workspace_id, kind, name)
            );

            CREATE TABLE IF NOT EXISTS mapping_annotations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schema_cache (
                cache_key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_catalogs_workspace ON catalogs(tenant_id, workspace_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_mapping_annotations_workspace ON mapping_annotations(tenant_id, workspace_id, kind);
            CREATE INDEX IF NOT EXISTS idx_schema_cache_expiry ON schema_cache(expires_at);
            "#,
        )?;

        Ok(())
    }

    // ==================== Workspaces ====================

    pub async fn get_workspace_name(&self, tenant_id: &str, workspace_id: &str) -> SqliteResult<Option<String>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT name FROM workspaces WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant_id, workspace_id],
            |row| row.get(0),
        )
        .optional()
    }

    // ==================== Catalogs ====================

    /// Insert or replace a catalog registration
    pub async fn save_catalog(&self, entry: &CatalogEntry) -> SqliteResult<()> {
        let introspection_json = entry
            .introspection
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO catalogs
            (id, tenant_id, workspace_id, catalog_name, database_name, connector, connection_url,
             created_at, refreshed_at, introspection_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            rusqlite::params![
                entry.id,
                entry.tenant_id,
                entry.workspace_id,
                entry.catalog_name,
                entry.database_name,
                entry.connector,
                entry.connection_url,
                entry.created_at.to_rfc3339(),
                entry.refreshed_at.map(|d| d.to_rfc3339()),
                introspection_json,
            ],
        )?;
        Ok(())
    }

    pub async fn get_catalog(&self, tenant_id: &str, catalog_name: &str) -> SqliteResult<Option<CatalogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, workspace_id, catalog_name, database_name, connector, connection_url, \
             created_at, refreshed_at, introspection_json FROM catalogs WHERE tenant_id = ?1 AND catalog_name = ?2",
        )?;
        stmt.query_row(rusqlite::params![tenant_id, catalog_name], catalog_from_row)
            .optional()
    }

    /// Catalogs of a workspace in registration order
    pub async fn list_catalogs(&self, tenant_id: &str, workspace_id: &str) -> SqliteResult<Vec<CatalogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, workspace_id, catalog_name, database_name, connector, connection_url, \
             created_at, refreshed_at, introspection_json FROM catalogs \
             WHERE tenant_id = ?1 AND workspace_id = ?2 ORDER BY created_at, catalog_name",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant_id, workspace_id], catalog_from_row)?;

        let mut catalogs = Vec::new();
        for row in rows {
            catalogs.push(row?);
        }
        Ok(catalogs)
    }

    pub async fn delete_catalog(&self, tenant_id: &str, catalog_name: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let rows_affected = conn.execute(
            "DELETE FROM catalogs WHERE tenant_id = ?1 AND catalog_name = ?2",
            rusqlite::params![tenant_id, catalog_name],
        )?;
        Ok(rows_affected > 0)
    }

    // ==================== Ontology & mappings ====================

    /// Replace a workspace's ontology elements and mapping annotations in one transaction
    pub async fn replace_ontology(&self, tenant_id: &str, workspace_id: &str, import: &OntologyImport) -> SqliteResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM ontology_elements WHERE tenant_id = ?1 AND workspace_id = ?2",
            rusqlite::params![tenant_id, workspace_id],
        )?;
        tx.execute(
            "DELETE FROM mapping_annotations WHERE tenant_id = ?1 AND workspace_id = ?2",
            rusqlite::params![tenant_id, workspace_id],
        )?;

        {
            let mut insert_element = tx.prepare(
                "INSERT OR REPLACE INTO ontology_elements (tenant_id, workspace_id, kind, name, payload_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for class in &import.classes {
                insert_element.execute(rusqlite::params![tenant_id, workspace_id, KIND_CLASS, class.name, encode_json(class)?])?;
            }
            for prop in &import.object_properties {
                insert_element.execute(rusqlite::params![
                    tenant_id,
                    workspace_id,
                    KIND_OBJECT_PROPERTY,
                    prop.name,
                    encode_json(prop)?
                ])?;
            }
            for prop in &import.data_properties {
                insert_element.execute(rusqlite::params![
                    tenant_id,
                    workspace_id,
                    KIND_DATA_PROPERTY,
                    prop.name,
                    encode_json(prop)?
                ])?;
            }

            let mut insert_mapping = tx.prepare(
                "INSERT INTO mapping_annotations (tenant_id, workspace_id, kind, payload_json) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for mapping in &import.mappings.classes {
                insert_mapping.execute(rusqlite::params![tenant_id, workspace_id, MAPPING_CLASS, encode_json(mapping)?])?;
            }
            for mapping in &import.mappings.properties {
                insert_mapping.execute(rusqlite::params![tenant_id, workspace_id, MAPPING_PROPERTY, encode_json(mapping)?])?;
            }
            for mapping in &import.mappings.relationships {
                insert_mapping.execute(rusqlite::params![
                    tenant_id,
                    workspace_id,
                    MAPPING_RELATIONSHIP,
                    encode_json(mapping)?
                ])?;
            }
        }

        if let Some(name) = &import.workspace_name {
            let now = Utc::now().to_rfc3339();
            tx.execute(
                r#"
                INSERT INTO workspaces (tenant_id, id, name, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?4)
                ON CONFLICT (tenant_id, id) DO UPDATE SET name = excluded.name, updated_at = excluded.updated_at
                "#,
                rusqlite::params![tenant_id, workspace_id, name, now],
            )?;
        }

        tx.commit()
    }

    async fn load_elements<T: DeserializeOwned>(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        kind: &str,
        scope: OntologyScope,
    ) -> SqliteResult<Vec<T>> {
        let shared = if scope.include_shared { SHARED_WORKSPACE } else { workspace_id };
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM ontology_elements \
             WHERE tenant_id = ?1 AND (workspace_id = ?2 OR workspace_id = ?3) AND kind = ?4 \
             ORDER BY CASE WHEN workspace_id = ?2 THEN 0 ELSE 1 END, name",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant_id, workspace_id, shared, kind], |row| {
            decode_json::<T>(row.get::<_, String>(0)?, 0)
        })?;

        let mut elements = Vec::new();
        for row in rows {
            elements.push(row?);
        }
        Ok(elements)
    }

    async fn load_mappings(&self, tenant_id: &str, workspace_id: &str) -> SqliteResult<MappingSet> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT kind, payload_json FROM mapping_annotations WHERE tenant_id = ?1 AND workspace_id = ?2 ORDER BY id",
        )?;
        let mut rows = stmt.query(rusqlite::params![tenant_id, workspace_id])?;

        let mut mappings = MappingSet::default();
        while let Some(row) = rows.next()? {
            let kind: String = row.get(0)?;
            let payload: String = row.get(1)?;
            match kind.as_str() {
                MAPPING_CLASS => mappings.classes.push(decode_json(payload, 1)?),
                MAPPING_PROPERTY => mappings.properties.push(decode_json(payload, 1)?),
                MAPPING_RELATIONSHIP => mappings.relationships.push(decode_json(payload, 1)?),
                other => tracing::warn!("Skipping mapping annotation of unknown kind {}", other),
            }
        }
        Ok(mappings)
    }

    // ==================== Schema cache ====================

    pub async fn cache_get(&self, key: &str) -> SqliteResult<Option<String>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT value FROM schema_cache WHERE cache_key = ?1 AND expires_at > ?2",
            rusqlite::params![key, Utc::now().timestamp_millis()],
            |row| row.get(0),
        )
        .optional()
    }

    pub async fn cache_set(&self, key: &str, value: &str, ttl: Duration) -> SqliteResult<()> {
        let expires_at = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO schema_cache (cache_key, value, expires_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, value, expires_at],
        )?;
        Ok(())
    }

    pub async fn cache_delete(&self, key: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let rows_affected = conn.execute("DELETE FROM schema_cache WHERE cache_key = ?1", rusqlite::params![key])?;
        Ok(rows_affected > 0)
    }

    /// Remove expired cache rows
    pub async fn purge_expired_cache(&self) -> SqliteResult<usize> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM schema_cache WHERE expires_at <= ?1",
            rusqlite::params![Utc::now().timestamp_millis()],
        )
    }
}

fn encode_json<T: Serialize>(value: &T) -> SqliteResult<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn decode_json<T: DeserializeOwned>(raw: String, column: usize) -> SqliteResult<T> {
    serde_json::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn parse_timestamp(raw: &str, column: usize) -> SqliteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn catalog_from_row(row: &rusqlite::Row<'_>) -> SqliteResult<CatalogEntry> {
    let refreshed_at = match row.get::<_, Option<String>>(8)? {
        Some(raw) => Some(parse_timestamp(&raw, 8)?),
        None => None,
    };
    let introspection = match row.get::<_, Option<String>>(9)? {
        Some(raw) => Some(decode_json(raw, 9)?),
        None => None,
    };
    Ok(CatalogEntry {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        workspace_id: row.get(2)?,
        catalog_name: row.get(3)?,
        database_name: row.get(4)?,
        connector: row.get(5)?,
        connection_url: row.get(6)?,
        created_at: parse_timestamp(&row.get::<_, String>(7)?, 7)?,
        refreshed_at,
        introspection,
    })
}

#[async_trait]
impl OntologyStore for SqliteStorage {
    async fn get_classes(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        scope: OntologyScope,
    ) -> Result<Vec<OntologyClass>, AppError> {
        Ok(self.load_elements(tenant_id, workspace_id, KIND_CLASS, scope).await?)
    }

    async fn get_object_properties(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        scope: OntologyScope,
    ) -> Result<Vec<ObjectProperty>, AppError> {
        Ok(self.load_elements(tenant_id, workspace_id, KIND_OBJECT_PROPERTY, scope).await?)
    }

    async fn get_data_properties(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        scope: OntologyScope,
    ) -> Result<Vec<DataProperty>, AppError> {
        Ok(self.load_elements(tenant_id, workspace_id, KIND_DATA_PROPERTY, scope).await?)
    }

    async fn workspace_name(&self, tenant_id: &str, workspace_id: &str) -> Result<Option<String>, AppError> {
        Ok(self.get_workspace_name(tenant_id, workspace_id).await?)
    }
}

#[async_trait]
impl MappingAnnotationStore for SqliteStorage {
    async fn get_mapping_annotations(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        _workspace_name: &str,
    ) -> Result<MappingSet, AppError> {
        Ok(self.load_mappings(tenant_id, workspace_id).await?)
    }
}

#[async_trait]
impl CacheStore for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.cache_get(key).await?)
    }

    async fn set_with_expiry(&self, key: &str, value: String, ttl: Duration) -> Result<(), AppError> {
        Ok(self.cache_set(key, &value, ttl).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.cache_delete(key).await?)
    }

    async fn purge_expired(&self) -> Result<usize, AppError> {
        Ok(self.purge_expired_cache().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CatalogColumn, CatalogIntrospection, CatalogTable};
    use crate::services::vkg::test_support::{sales_annotations, sales_import};
    use tempfile::tempdir;

    fn open(dir: &tempfile::TempDir) -> SqliteStorage {
        let db_path = dir.path().join("test.db");
        tokio_test::block_on(SqliteStorage::new(&db_path)).unwrap()
    }

    #[test]
    fn test_sqlite_storage_creation() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = tokio_test::block_on(SqliteStorage::new(format!("sqlite://{}", db_path.display())));
        assert!(storage.is_ok());
    }

    #[test]
    fn test_schema_initialization() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);

        let conn = tokio_test::block_on(storage.conn.lock());
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let tables: Vec<String> = stmt.query_map([], |row| row.get(0)).unwrap().map(|r| r.unwrap()).collect();

        for expected in ["catalogs", "mapping_annotations", "ontology_elements", "schema_cache", "workspaces"] {
            assert!(tables.contains(&expected.to_string()), "missing table {}", expected);
        }
    }

    #[test]
    fn test_catalog_crud() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);

        let mut entry = CatalogEntry::new(
            "acme".into(),
            "ws1".into(),
            "acme_sales".into(),
            "sales".into(),
            "postgresql".into(),
            "jdbc:postgresql://db/sales".into(),
        );
        tokio_test::block_on(storage.save_catalog(&entry)).unwrap();

        let listed = tokio_test::block_on(storage.list_catalogs("acme", "ws1")).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].introspection.is_none());
        assert!(tokio_test::block_on(storage.list_catalogs("other", "ws1")).unwrap().is_empty());

        entry.mark_refreshed(CatalogIntrospection::new(
            "acme_sales".into(),
            vec![CatalogTable {
                catalog: "acme_sales".into(),
                schema: "sales".into(),
                name: "customers".into(),
                columns: vec![CatalogColumn {
                    name: "id".into(),
                    data_type: "bigint".into(),
                    is_nullable: false,
                }],
            }],
        ));
        tokio_test::block_on(storage.save_catalog(&entry)).unwrap();

        let fetched = tokio_test::block_on(storage.get_catalog("acme", "acme_sales")).unwrap().unwrap();
        assert!(fetched.refreshed_at.is_some());
        assert_eq!(fetched.introspection.unwrap().tables.len(), 1);

        assert!(tokio_test::block_on(storage.delete_catalog("acme", "acme_sales")).unwrap());
        assert!(tokio_test::block_on(storage.get_catalog("acme", "acme_sales")).unwrap().is_none());
    }

    #[test]
    fn test_ontology_import_and_reads() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);
        let import = sales_import();

        tokio_test::block_on(storage.replace_ontology("acme", "ws1", &import)).unwrap();

        let scope = OntologyScope::default();
        let classes = tokio_test::block_on(storage.get_classes("acme", "ws1", scope)).unwrap();
        assert_eq!(classes.len(), import.classes.len());
        let data = tokio_test::block_on(storage.get_data_properties("acme", "ws1", scope)).unwrap();
        assert_eq!(data.len(), import.data_properties.len());

        let mappings = tokio_test::block_on(storage.get_mapping_annotations("acme", "ws1", "Sales")).unwrap();
        assert_eq!(mappings, sales_annotations());

        let name = tokio_test::block_on(OntologyStore::workspace_name(&storage, "acme", "ws1")).unwrap();
        assert_eq!(name.as_deref(), Some("Sales"));

        // Re-import replaces instead of appending
        tokio_test::block_on(storage.replace_ontology("acme", "ws1", &import)).unwrap();
        let mappings = tokio_test::block_on(storage.get_mapping_annotations("acme", "ws1", "Sales")).unwrap();
        assert_eq!(mappings.classes.len(), import.mappings.classes.len());
    }

    #[test]
    fn test_shared_elements_follow_scope() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);
        let shared = OntologyImport {
            classes: vec![OntologyClass::new("Currency")],
            ..Default::default()
        };
        tokio_test::block_on(storage.replace_ontology("acme", SHARED_WORKSPACE, &shared)).unwrap();
        tokio_test::block_on(storage.replace_ontology("acme", "ws1", &sales_import())).unwrap();

        let own = tokio_test::block_on(storage.get_classes("acme", "ws1", OntologyScope::default())).unwrap();
        assert!(!own.iter().any(|c| c.name == "Currency"));

        let with_shared = tokio_test::block_on(storage.get_classes(
            "acme",
            "ws1",
            OntologyScope { include_shared: true },
        ))
        .unwrap();
        assert_eq!(with_shared.last().map(|c| c.name.as_str()), Some("Currency"));
    }

    #[test]
    fn test_cache_store_expiry() {
        let dir = tempdir().unwrap();
        let storage = open(&dir);

        tokio_test::block_on(storage.set_with_expiry("k", "v".into(), Duration::from_secs(60))).unwrap();
        assert_eq!(tokio_test::block_on(CacheStore::get(&storage, "k")).unwrap().as_deref(), Some("v"));

        tokio_test::block_on(storage.set_with_expiry("old", "v".into(), Duration::from_millis(0))).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(tokio_test::block_on(CacheStore::get(&storage, "old")).unwrap().is_none());
        assert_eq!(tokio_test::block_on(storage.purge_expired_cache()).unwrap(), 1);

        assert!(tokio_test::block_on(CacheStore::delete(&storage, "k")).unwrap());
        assert!(!tokio_test::block_on(CacheStore::delete(&storage, "k")).unwrap());
    }
}
