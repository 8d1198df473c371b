// Mapping Resolver
//
// Rewrites two-part `database.table` references in mapping annotations into the
// engine's three-part `catalog.database.table` form. Three-part and
// unresolvable references are returned untouched, so resolution is idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{CatalogEntry, MappingSet};
use crate::services::catalog_registry::CatalogRegistry;
use crate::services::vkg::join_augmenter::JoinAugmenter;
use crate::services::vkg::sql_fragment::{JoinCondition, TableRef};

/// Physical database name -> catalog name lookup
#[derive(Debug, Clone, Default)]
pub struct TableNameResolver {
    database_to_catalog: HashMap<String, String>,
}

impl TableNameResolver {
    pub fn from_catalogs(catalogs: &[CatalogEntry]) -> Self {
        let mut database_to_catalog = HashMap::new();
        for entry in catalogs {
            let key = entry.database_name.to_lowercase();
            if let Some(existing) = database_to_catalog.get(&key) {
                tracing::warn!(
                    "Database {} is exposed by catalogs {} and {}; keeping {}",
                    entry.database_name,
                    existing,
                    entry.catalog_name,
                    existing
                );
                continue;
            }
            database_to_catalog.insert(key, entry.catalog_name.clone());
        }
        Self { database_to_catalog }
    }

    pub fn catalog_for(&self, database: &str) -> Option<&str> {
        self.database_to_catalog
            .get(&database.to_lowercase())
            .map(String::as_str)
    }

    /// Resolve a table reference to its three-part form when possible
    pub fn resolve(&self, reference: &str) -> String {
        match self.resolve_ref(reference) {
            Some(resolved) => resolved.to_string(),
            None => reference.to_string(),
        }
    }

    fn resolve_ref(&self, reference: &str) -> Option<TableRef> {
        let table = TableRef::parse(reference)?;
        if table.part_count() != 2 {
            return None;
        }
        let catalog = self.catalog_for(table.schema()?)?;
        Some(table.with_catalog(catalog))
    }

    fn resolve_table(&self, table: &TableRef) -> TableRef {
        match table.part_count() {
            2 => table
                .schema()
                .and_then(|db| self.catalog_for(db))
                .map(|catalog| table.with_catalog(catalog))
                .unwrap_or_else(|| table.clone()),
            _ => table.clone(),
        }
    }

    /// Resolve the table qualifiers inside a join condition; unparseable
    /// conditions are returned as-is
    pub fn resolve_join_condition(&self, condition: &str) -> String {
        match JoinCondition::parse(condition) {
            Some(parsed) => {
                let needs_rewrite = parsed.tables().iter().any(|t| t.part_count() == 2);
                if needs_rewrite {
                    parsed.map_tables(|t| self.resolve_table(t)).to_string()
                } else {
                    condition.to_string()
                }
            }
            None => condition.to_string(),
        }
    }

    pub fn resolve_mappings(&self, mut mappings: MappingSet) -> MappingSet {
        for class in &mut mappings.classes {
            class.source_table = self.resolve(&class.source_table);
        }
        for prop in &mut mappings.properties {
            prop.source_table = self.resolve(&prop.source_table);
        }
        for rel in &mut mappings.relationships {
            rel.join_condition = self.resolve_join_condition(&rel.join_condition);
        }
        mappings
    }
}

/// Drop relationships whose join condition is missing or reaches outside
/// the class mappings
pub fn retain_mapped_relationships(mut mappings: MappingSet) -> MappingSet {
    let mapped: Vec<TableRef> = mappings
        .classes
        .iter()
        .filter_map(|c| TableRef::parse(&c.source_table))
        .collect();

    mappings.relationships.retain(|rel| {
        let Some(condition) = JoinCondition::parse(&rel.join_condition) else {
            tracing::warn!(
                "Dropping relationship {} ({} -> {}): no usable join condition",
                rel.name,
                rel.domain_class,
                rel.range_class
            );
            return false;
        };
        let outside: Vec<String> = condition
            .tables()
            .into_iter()
            .filter(|t| !mapped.iter().any(|m| t.matches(m)))
            .map(|t| t.to_string())
            .collect();
        if !outside.is_empty() {
            tracing::warn!(
                "Dropping relationship {}: join condition references unmapped table(s) {}",
                rel.name,
                outside.join(", ")
            );
            return false;
        }
        true
    });
    mappings
}

/// Produces the request's resolved mapping set: table names, join
/// augmentation from live foreign keys, relationship invariant
pub struct MappingResolver {
    registry: Arc<dyn CatalogRegistry>,
    augmenter: JoinAugmenter,
}

impl MappingResolver {
    pub fn new(registry: Arc<dyn CatalogRegistry>) -> Self {
        Self {
            augmenter: JoinAugmenter::new(registry.clone()),
            registry,
        }
    }

    pub async fn resolve(&self, tenant_id: &str, workspace_id: &str, annotations: MappingSet) -> MappingSet {
        let catalogs = match self.registry.list_catalogs(tenant_id, workspace_id).await {
            Ok(catalogs) => catalogs,
            Err(e) => {
                tracing::warn!("Failed to list catalogs for workspace {}: {}", workspace_id, e);
                Vec::new()
            }
        };

        let resolver = TableNameResolver::from_catalogs(&catalogs);
        let resolved = resolver.resolve_mappings(annotations);
        let augmented = self.augmenter.augment(tenant_id, workspace_id, resolved).await;

        retain_mapped_relationships(augmented)
    }
}
