use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One registered external database, exposed to the engine as a catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub tenant_id: String,
    pub workspace_id: String,
    pub catalog_name: String,
    /// Database (engine schema) the catalog exposes
    pub database_name: String,
    pub connector: String,
    #[serde(skip_serializing)]
    pub connection_url: String,
    pub created_at: DateTime<Utc>,
    pub refreshed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub introspection: Option<CatalogIntrospection>,
}

impl CatalogEntry {
    pub fn new(
        tenant_id: String,
        workspace_id: String,
        catalog_name: String,
        database_name: String,
        connector: String,
        connection_url: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            workspace_id,
            catalog_name,
            database_name,
            connector,
            connection_url,
            created_at: Utc::now(),
            refreshed_at: None,
            introspection: None,
        }
    }

    pub fn mark_refreshed(&mut self, introspection: CatalogIntrospection) {
        self.refreshed_at = Some(introspection.retrieved_at);
        self.introspection = Some(introspection);
    }
}

/// Catalog name for a tenant's database: lowercase, `[a-z0-9_]` only
pub fn catalog_name_for(tenant_id: &str, database_name: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect::<String>()
            .trim_matches('_')
            .to_string()
    };
    format!("{}_{}", sanitize(tenant_id), sanitize(database_name))
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterCatalogRequest {
    pub database_name: String,
    #[serde(default = "default_connector")]
    pub connector: String,
    pub connection_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

fn default_connector() -> String {
    "postgresql".to_string()
}

impl RegisterCatalogRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.database_name.trim().is_empty() {
            return Err("database_name cannot be empty".to_string());
        }
        if self.connection_url.trim().is_empty() {
            return Err("connection_url cannot be empty".to_string());
        }
        match self.connector.as_str() {
            "postgresql" | "mysql" | "sqlserver" | "oracle" | "mariadb" => Ok(()),
            other => Err(format!("Unsupported connector: {}", other)),
        }
    }
}

/// Result of introspecting a catalog through the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogIntrospection {
    pub catalog_name: String,
    pub tables: Vec<CatalogTable>,
    pub relationships: Vec<ForeignKey>,
    pub retrieved_at: DateTime<Utc>,
}

impl CatalogIntrospection {
    pub fn new(catalog_name: String, tables: Vec<CatalogTable>) -> Self {
        let relationships = infer_foreign_keys(&tables);
        Self {
            catalog_name,
            tables,
            relationships,
            retrieved_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogTable {
    pub catalog: String,
    pub schema: String,
    pub name: String,
    pub columns: Vec<CatalogColumn>,
}

impl CatalogTable {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.catalog, self.schema, self.name)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

/// Foreign key candidate between two fully-qualified tables
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl ForeignKey {
    /// True when the key links the two tables in either direction
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.from_table.eq_ignore_ascii_case(a) && self.to_table.eq_ignore_ascii_case(b))
            || (self.from_table.eq_ignore_ascii_case(b) && self.to_table.eq_ignore_ascii_case(a))
    }
}

/// Detect foreign keys by column naming: `<stem>_id` points at a table
/// `<stem>`, `<stem>s` or `<stem>es` in the same schema that has an `id` column.
pub fn infer_foreign_keys(tables: &[CatalogTable]) -> Vec<ForeignKey> {
    let mut keys = Vec::new();
    for table in tables {
        for column in &table.columns {
            let lower = column.name.to_lowercase();
            let Some(stem) = lower.strip_suffix("_id") else {
                continue;
            };
            if stem.is_empty() {
                continue;
            }
            let candidates = [stem.to_string(), format!("{}s", stem), format!("{}es", stem)];
            let target = tables.iter().find(|t| {
                t.schema == table.schema
                    && t.name != table.name
                    && candidates.iter().any(|c| t.name.eq_ignore_ascii_case(c))
                    && t.has_column("id")
            });
            if let Some(target) = target {
                keys.push(ForeignKey {
                    from_table: table.qualified_name(),
                    from_column: column.name.clone(),
                    to_table: target.qualified_name(),
                    to_column: "id".to_string(),
                });
            }
        }
    }
    keys
}
