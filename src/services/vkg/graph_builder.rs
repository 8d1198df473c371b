// Context Graph Builder
//
// Turns result rows into an evidence graph. Columns are attributed to
// ontology classes through the property mappings of the tables the query
// read (falling back to column naming); every row yields at most one node per class, identified by
// `(class, key value)`, and an edge for each declared relationship between
// two classes seen in the same row.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::api::middleware::AppError;
use crate::models::{
    ContextGraph, ExecutionResult, GraphEdge, GraphNode, GraphProvenance, GraphStatistics, OntologyContext,
    ReasoningTraceStep,
};
use crate::services::vkg::sql_fragment::TableRef;

/// Graph plus the reasoning trace narrated from it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphBuild {
    pub graph: ContextGraph,
    pub trace: Vec<ReasoningTraceStep>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextGraphBuilder;

/// Relationship declared between two classes, oriented domain -> range
#[derive(Debug, Clone)]
struct DeclaredRelation {
    name: String,
    domain: String,
    range: String,
    join_condition: Option<String>,
}

impl ContextGraphBuilder {
    pub fn build(
        &self,
        result: &ExecutionResult,
        context: &OntologyContext,
        sql: &str,
        referenced_tables: &[String],
        databases: &[String],
    ) -> Result<GraphBuild, AppError> {
        let column_classes = classify_columns(result, context, referenced_tables);
        let relations = declared_relations(context);

        let mut nodes: Vec<GraphNode> = Vec::new();
        let mut node_index: HashMap<String, usize> = HashMap::new();
        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut edge_set: HashSet<GraphEdge> = HashSet::new();

        for (row_number, row) in result.rows.iter().enumerate() {
            if row.len() != result.columns.len() {
                return Err(AppError::Internal(format!(
                    "Row {} has {} value(s) but the result has {} column(s)",
                    row_number,
                    row.len(),
                    result.columns.len()
                )));
            }

            // class -> non-null column indices, in column order
            let mut by_class: Vec<(String, Vec<usize>)> = Vec::new();
            let mut unattributed: Vec<usize> = Vec::new();
            for (idx, value) in row.iter().enumerate() {
                if value.is_null() {
                    continue;
                }
                match &column_classes[idx] {
                    Some(class) => match by_class.iter_mut().find(|(c, _)| c == class) {
                        Some((_, columns)) => columns.push(idx),
                        None => by_class.push((class.clone(), vec![idx])),
                    },
                    None => unattributed.push(idx),
                }
            }

            let mut row_nodes: Vec<(String, String)> = Vec::new();
            for (class, columns) in &by_class {
                let key_idx = key_column(class, columns, result);
                let value = row[key_idx].clone();
                let id = node_id(class, &value);

                let idx = match node_index.get(&id) {
                    Some(&idx) => idx,
                    None => {
                        let label = label_column(columns, result)
                            .map(|i| render(&row[i]))
                            .unwrap_or_else(|| render(&value));
                        nodes.push(GraphNode {
                            id: id.clone(),
                            node_type: class.clone(),
                            label,
                            value: value.clone(),
                            source_table: context.mappings.table_for_class(class).map(str::to_string),
                            properties: Map::new(),
                        });
                        node_index.insert(id.clone(), nodes.len() - 1);
                        nodes.len() - 1
                    }
                };

                let properties = &mut nodes[idx].properties;
                for &col in columns.iter().chain(unattributed.iter()) {
                    if col == key_idx {
                        continue;
                    }
                    properties
                        .entry(result.columns[col].name.clone())
                        .or_insert_with(|| row[col].clone());
                }
                row_nodes.push((class.clone(), id));
            }

            for (i, (class_a, id_a)) in row_nodes.iter().enumerate() {
                for (class_b, id_b) in row_nodes.iter().skip(i + 1) {
                    let Some(relation) = relations.iter().find(|r| {
                        (&r.domain == class_a && &r.range == class_b) || (&r.domain == class_b && &r.range == class_a)
                    }) else {
                        continue;
                    };
                    let (source, target) = if &relation.domain == class_a {
                        (id_a, id_b)
                    } else {
                        (id_b, id_a)
                    };
                    let edge = GraphEdge {
                        source: source.clone(),
                        target: target.clone(),
                        relation: relation.name.clone(),
                    };
                    if edge_set.insert(edge.clone()) {
                        edges.push(edge);
                    }
                }
            }
        }

        let mut nodes_by_type = BTreeMap::new();
        for node in &nodes {
            *nodes_by_type.entry(node.node_type.clone()).or_insert(0) += 1;
        }

        let graph = ContextGraph {
            statistics: GraphStatistics {
                node_count: nodes.len(),
                edge_count: edges.len(),
                rows_processed: result.rows.len(),
                nodes_by_type,
            },
            nodes,
            edges,
            provenance: GraphProvenance {
                sql: sql.to_string(),
                databases: databases.to_vec(),
            },
        };
        let trace = reasoning_trace(&graph, &relations, context);

        tracing::debug!(
            "Context graph: {} node(s), {} edge(s) from {} row(s)",
            graph.statistics.node_count,
            graph.statistics.edge_count,
            graph.statistics.rows_processed
        );
        Ok(GraphBuild { graph, trace })
    }
}

/// Class of each result column, if any. A column mapped in several tables
/// belongs to the mapping whose table the query referenced.
fn classify_columns(
    result: &ExecutionResult,
    context: &OntologyContext,
    referenced_tables: &[String],
) -> Vec<Option<String>> {
    let referenced: Vec<TableRef> = referenced_tables.iter().filter_map(|t| TableRef::parse(t)).collect();
    let is_referenced = |table: &str| {
        TableRef::parse(table).is_some_and(|mapped| referenced.iter().any(|r| r.matches(&mapped) || mapped.matches(r)))
    };

    let mut class_names: Vec<String> = context
        .mappings
        .classes
        .iter()
        .map(|c| c.class_name.clone())
        .chain(context.filtered_schema.classes.iter().map(|c| c.name.clone()))
        .collect();
    class_names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    class_names.dedup();

    result
        .columns
        .iter()
        .map(|column| {
            let name = column.name.to_lowercase();
            let candidates: Vec<_> = context
                .mappings
                .properties
                .iter()
                .filter(|p| p.source_column.eq_ignore_ascii_case(&column.name))
                .collect();
            let mapped = candidates
                .iter()
                .find(|p| is_referenced(&p.source_table))
                .or_else(|| candidates.first())
                .map(|p| p.domain_class.clone());
            mapped.or_else(|| {
                class_names
                    .iter()
                    .find(|class| name.contains(&class.to_lowercase()))
                    .cloned()
            })
        })
        .collect()
}

/// `id`, then `<class>_id`, then the first column of the class
fn key_column(class: &str, columns: &[usize], result: &ExecutionResult) -> usize {
    let class_key = format!("{}_id", class.to_lowercase());
    let named = |wanted: &str| {
        columns
            .iter()
            .copied()
            .find(|&i| result.columns[i].name.eq_ignore_ascii_case(wanted))
    };
    named("id")
        .or_else(|| named(&class_key))
        .unwrap_or(columns[0])
}

fn label_column(columns: &[usize], result: &ExecutionResult) -> Option<usize> {
    columns.iter().copied().find(|&i| {
        let name = result.columns[i].name.to_lowercase();
        name.contains("name") || name.contains("title") || name.contains("label")
    })
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Deterministic identity of the `(class, value)` pair
fn node_id(class: &str, value: &Value) -> String {
    format!("{}:{}", class, render(value))
}

fn declared_relations(context: &OntologyContext) -> Vec<DeclaredRelation> {
    let mut relations: Vec<DeclaredRelation> = context
        .mappings
        .relationships
        .iter()
        .map(|r| DeclaredRelation {
            name: r.name.clone(),
            domain: r.domain_class.clone(),
            range: r.range_class.clone(),
            join_condition: Some(r.join_condition.clone()),
        })
        .collect();
    for prop in &context.schema.object_properties {
        let known = relations
            .iter()
            .any(|r| (r.domain == prop.domain && r.range == prop.range) || (r.domain == prop.range && r.range == prop.domain));
        if !known {
            relations.push(DeclaredRelation {
                name: prop.name.clone(),
                domain: prop.domain.clone(),
                range: prop.range.clone(),
                join_condition: None,
            });
        }
    }
    relations
}

fn reasoning_trace(
    graph: &ContextGraph,
    relations: &[DeclaredRelation],
    context: &OntologyContext,
) -> Vec<ReasoningTraceStep> {
    let stats = &graph.statistics;
    let mut trace = Vec::new();

    let types: Vec<String> = stats
        .nodes_by_type
        .iter()
        .map(|(class, count)| format!("{} ({})", class, count))
        .collect();
    trace.push(ReasoningTraceStep {
        step: 1,
        narrative: if types.is_empty() {
            "No ontology entities were identified in the result".to_string()
        } else {
            format!("Identified {} entity type(s): {}", types.len(), types.join(", "))
        },
        evidence: graph.nodes.iter().take(10).map(|n| n.id.clone()).collect(),
        sources: stats
            .nodes_by_type
            .keys()
            .filter_map(|class| context.mappings.table_for_class(class))
            .map(str::to_string)
            .collect(),
    });

    let mut traversed: Vec<(&DeclaredRelation, usize)> = Vec::new();
    for edge in &graph.edges {
        let Some(relation) = relations.iter().find(|r| r.name == edge.relation) else {
            continue;
        };
        match traversed.iter_mut().find(|(r, _)| r.name == relation.name) {
            Some((_, count)) => *count += 1,
            None => traversed.push((relation, 1)),
        }
    }
    trace.push(ReasoningTraceStep {
        step: 2,
        narrative: if traversed.is_empty() {
            "No relationships were traversed".to_string()
        } else {
            format!(
                "Traversed relationship(s): {}",
                traversed
                    .iter()
                    .map(|(r, _)| format!("{} ({} -> {})", r.name, r.domain, r.range))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        },
        evidence: traversed
            .iter()
            .map(|(r, count)| format!("{}: {} edge(s)", r.name, count))
            .collect(),
        sources: traversed
            .iter()
            .filter_map(|(r, _)| r.join_condition.clone())
            .collect(),
    });

    if stats.nodes_by_type.len() > 1 {
        let path = if traversed.is_empty() {
            stats.nodes_by_type.keys().cloned().collect::<Vec<_>>().join(", ")
        } else {
            traversed
                .iter()
                .map(|(r, _)| format!("{} -[{}]-> {}", r.domain, r.name, r.range))
                .collect::<Vec<_>>()
                .join(", ")
        };
        trace.push(ReasoningTraceStep {
            step: trace.len() + 1,
            narrative: format!("Entity path: {}", path),
            evidence: graph
                .edges
                .iter()
                .take(10)
                .map(|e| format!("{} -> {}", e.source, e.target))
                .collect(),
            sources: Vec::new(),
        });
    }

    trace.push(ReasoningTraceStep {
        step: trace.len() + 1,
        narrative: format!(
            "Processed {} row(s) into {} entit{} from {} database(s)",
            stats.rows_processed,
            stats.node_count,
            if stats.node_count == 1 { "y" } else { "ies" },
            graph.provenance.databases.len()
        ),
        evidence: vec![graph.provenance.sql.clone()],
        sources: graph.provenance.databases.clone(),
    });

    trace
}
