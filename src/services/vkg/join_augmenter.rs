// Join Augmenter
//
// Cross-references relationship mappings against foreign keys discovered by
// live catalog introspection. Corrects recorded join conditions, and
// synthesizes relationships for foreign keys the ontology does not declare.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;

use crate::models::{ForeignKey, MappingSet, RelationshipMapping};
use crate::services::catalog_registry::CatalogRegistry;
use crate::services::vkg::sql_fragment::{JoinCondition, TableRef};

pub struct JoinAugmenter {
    registry: Arc<dyn CatalogRegistry>,
}

impl JoinAugmenter {
    pub fn new(registry: Arc<dyn CatalogRegistry>) -> Self {
        Self { registry }
    }

    /// Introspect every catalog the class mappings touch, then augment.
    /// Introspection failures are logged and leave the mappings as they were.
    pub async fn augment(&self, tenant_id: &str, workspace_id: &str, mappings: MappingSet) -> MappingSet {
        let catalogs = referenced_catalogs(&mappings);
        if catalogs.is_empty() {
            return mappings;
        }

        let introspections = join_all(
            catalogs
                .iter()
                .map(|catalog| self.registry.introspect_catalog(tenant_id, catalog, workspace_id)),
        )
        .await;

        let mut foreign_keys = Vec::new();
        for (catalog, result) in catalogs.iter().zip(introspections) {
            match result {
                Ok(introspection) => {
                    tracing::debug!(
                        "Catalog {} reports {} foreign key candidate(s)",
                        catalog,
                        introspection.relationships.len()
                    );
                    foreign_keys.extend(introspection.relationships);
                }
                Err(e) => {
                    tracing::warn!("Introspection of catalog {} failed, joins left as recorded: {}", catalog, e);
                }
            }
        }

        augment_with_foreign_keys(mappings, &foreign_keys)
    }
}

/// Catalogs referenced by fully-qualified class tables
pub fn referenced_catalogs(mappings: &MappingSet) -> Vec<String> {
    mappings
        .classes
        .iter()
        .filter_map(|c| TableRef::parse(&c.source_table))
        .filter_map(|t| t.catalog().map(str::to_string))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn augment_with_foreign_keys(mut mappings: MappingSet, foreign_keys: &[ForeignKey]) -> MappingSet {
    let class_tables: HashMap<String, String> = mappings
        .classes
        .iter()
        .map(|c| (c.class_name.clone(), c.source_table.clone()))
        .collect();

    for rel in &mut mappings.relationships {
        let (Some(domain_table), Some(range_table)) =
            (class_tables.get(&rel.domain_class), class_tables.get(&rel.range_class))
        else {
            continue;
        };
        let Some(fk) = foreign_keys.iter().find(|fk| fk.connects(domain_table, range_table)) else {
            continue;
        };
        let Some(live) = JoinCondition::from_foreign_key(fk) else {
            continue;
        };

        let matches_recorded = JoinCondition::parse(&rel.join_condition)
            .map(|recorded| recorded.equivalent(&live))
            .unwrap_or(false);
        if !matches_recorded {
            tracing::info!(
                "Join for {} corrected from live foreign key: '{}' -> '{}'",
                rel.name,
                rel.join_condition,
                live
            );
            rel.join_condition = live.to_string();
        }
    }

    let mut synthesized: Vec<RelationshipMapping> = Vec::new();
    for fk in foreign_keys {
        let (Some(owner), Some(target)) = (
            mappings.class_for_table(&fk.from_table),
            mappings.class_for_table(&fk.to_table),
        ) else {
            continue;
        };
        if owner.class_name == target.class_name {
            continue;
        }
        let already_related = mappings
            .relationship_between(&owner.class_name, &target.class_name)
            .is_some()
            || synthesized.iter().any(|r| {
                (r.domain_class == owner.class_name && r.range_class == target.class_name)
                    || (r.domain_class == target.class_name && r.range_class == owner.class_name)
            });
        if already_related {
            continue;
        }
        let Some(condition) = JoinCondition::from_foreign_key(fk) else {
            continue;
        };

        let name = format!("{}_{}", owner.class_name, fk.from_column);
        tracing::info!(
            "Synthesized relationship {} ({} -> {}) from foreign key",
            name,
            owner.class_name,
            target.class_name
        );
        synthesized.push(RelationshipMapping {
            name,
            domain_class: owner.class_name.clone(),
            range_class: target.class_name.clone(),
            join_condition: condition.to_string(),
            synthesized: true,
        });
    }

    mappings.relationships.extend(synthesized);
    mappings
}
