use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Entity derived from result rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    pub value: Value,
    pub source_table: Option<String>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub rows_processed: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphProvenance {
    pub sql: String,
    pub databases: Vec<String>,
}

/// Per-query evidence graph; never persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub statistics: GraphStatistics,
    pub provenance: GraphProvenance,
}

impl ContextGraph {
    pub fn empty(sql: &str, databases: Vec<String>) -> Self {
        Self {
            provenance: GraphProvenance {
                sql: sql.to_string(),
                databases,
            },
            ..Default::default()
        }
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes_of_type<'a>(&'a self, node_type: &'a str) -> impl Iterator<Item = &'a GraphNode> + 'a {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTraceStep {
    pub step: usize,
    pub narrative: String,
    pub evidence: Vec<String>,
    pub sources: Vec<String>,
}
