// Schema Drift Detector
//
// Compares the tables and columns the mappings rely on with a fresh
// introspection of the catalogs they live in. Runs beside the query
// pipeline; its outcome is only ever a list of warnings.

use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::api::middleware::AppError;
use crate::models::{CatalogTable, MappingSet, SchemaDriftReport};
use crate::services::catalog_registry::CatalogRegistry;
use crate::services::vkg::join_augmenter::referenced_catalogs;
use crate::services::vkg::sql_fragment::{JoinCondition, TableRef};

pub struct DriftDetector {
    registry: Arc<dyn CatalogRegistry>,
}

impl DriftDetector {
    pub fn new(registry: Arc<dyn CatalogRegistry>) -> Self {
        Self { registry }
    }

    pub async fn detect(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        mappings: &MappingSet,
    ) -> Result<SchemaDriftReport, AppError> {
        let catalogs = referenced_catalogs(mappings);
        let introspections = join_all(
            catalogs
                .iter()
                .map(|catalog| self.registry.introspect_catalog(tenant_id, catalog, workspace_id)),
        )
        .await;

        let mut live = Vec::new();
        for introspection in introspections {
            live.extend(introspection?.tables);
        }
        Ok(compute_drift(mappings, &live))
    }

    /// Run `detect` on its own task. The handle resolves to drift warnings;
    /// any failure resolves to none.
    pub fn spawn(self: &Arc<Self>, tenant_id: &str, workspace_id: &str, mappings: MappingSet) -> JoinHandle<Vec<String>> {
        let detector = Arc::clone(self);
        let tenant_id = tenant_id.to_string();
        let workspace_id = workspace_id.to_string();
        tokio::spawn(async move {
            match detector.detect(&tenant_id, &workspace_id, &mappings).await {
                Ok(report) => {
                    if report.has_drift {
                        tracing::warn!(
                            "Schema drift in workspace {}: {} new table(s), {} removed table(s), {} new column(s), {} removed column(s)",
                            workspace_id,
                            report.new_tables.len(),
                            report.removed_tables.len(),
                            report.new_columns.len(),
                            report.removed_columns.len()
                        );
                    }
                    report.warnings()
                }
                Err(e) => {
                    tracing::debug!("Drift detection skipped for workspace {}: {}", workspace_id, e);
                    Vec::new()
                }
            }
        })
    }
}

/// Lowercased `catalog.schema.table` -> mapped column names
fn mapped_columns(mappings: &MappingSet) -> BTreeMap<String, BTreeSet<String>> {
    let mut tables: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let qualified = |raw: &str| TableRef::parse(raw).filter(TableRef::is_fully_qualified).map(|t| t.key());

    for class in &mappings.classes {
        if let Some(key) = qualified(&class.source_table) {
            let columns = tables.entry(key).or_default();
            if let Some(pk) = &class.primary_key {
                columns.insert(pk.to_lowercase());
            }
        }
    }
    for prop in &mappings.properties {
        if let Some(key) = qualified(&prop.source_table) {
            tables.entry(key).or_default().insert(prop.source_column.to_lowercase());
        }
    }
    for rel in &mappings.relationships {
        let Some(condition) = JoinCondition::parse(&rel.join_condition) else {
            continue;
        };
        for column in condition.columns() {
            let Some(table) = &column.table else {
                continue;
            };
            if let Some(columns) = tables.get_mut(&table.key()) {
                columns.insert(column.column.to_lowercase());
            }
        }
    }
    tables
}

/// Diff mapped tables/columns against the live tables of the same schemas
pub fn compute_drift(mappings: &MappingSet, live: &[CatalogTable]) -> SchemaDriftReport {
    let mapped = mapped_columns(mappings);
    let schemas: BTreeSet<String> = mapped
        .keys()
        .filter_map(|key| key.rsplit_once('.').map(|(schema, _)| schema.to_string()))
        .collect();

    let live: BTreeMap<String, BTreeSet<String>> = live
        .iter()
        .filter(|t| schemas.contains(&format!("{}.{}", t.catalog, t.schema).to_lowercase()))
        .map(|t| {
            (
                t.qualified_name().to_lowercase(),
                t.columns.iter().map(|c| c.name.to_lowercase()).collect(),
            )
        })
        .collect();

    let new_tables = live.keys().filter(|t| !mapped.contains_key(*t)).cloned().collect();
    let removed_tables = mapped.keys().filter(|t| !live.contains_key(*t)).cloned().collect();

    let mut new_columns = BTreeSet::new();
    let mut removed_columns = BTreeSet::new();
    for (table, mapped_cols) in &mapped {
        let Some(live_cols) = live.get(table) else {
            continue;
        };
        for column in live_cols.difference(mapped_cols) {
            new_columns.insert(format!("{}.{}", table, column));
        }
        for column in mapped_cols.difference(live_cols) {
            removed_columns.insert(format!("{}.{}", table, column));
        }
    }

    SchemaDriftReport::new(new_tables, removed_tables, new_columns, removed_columns)
}
