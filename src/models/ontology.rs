use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An ontology class with its attached properties and optional physical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyClass {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub table: Option<String>,
}

impl OntologyClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            description: None,
            properties: Vec::new(),
            table: None,
        }
    }
}

/// Relationship between two classes (owl:ObjectProperty)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectProperty {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    pub domain: String,
    pub range: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Literal-valued attribute of a class (owl:DatatypeProperty)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProperty {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    pub domain: String,
    #[serde(default = "default_range")]
    pub range: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_range() -> String {
    "string".to_string()
}

/// Full ontology snapshot for a workspace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OntologySchema {
    #[serde(default)]
    pub classes: Vec<OntologyClass>,
    #[serde(default)]
    pub object_properties: Vec<ObjectProperty>,
    #[serde(default)]
    pub data_properties: Vec<DataProperty>,
}

impl OntologySchema {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.object_properties.is_empty() && self.data_properties.is_empty()
    }

    /// Fold the data properties into each class's property list
    pub fn attach_properties(mut self) -> Self {
        for class in &mut self.classes {
            for prop in self.data_properties.iter().filter(|p| p.domain == class.name) {
                if !class.properties.contains(&prop.name) {
                    class.properties.push(prop.name.clone());
                }
            }
        }
        self
    }
}

/// Scope options forwarded to the ontology store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyScope {
    /// Also include tenant-wide elements shared across workspaces
    pub include_shared: bool,
}

/// Class to physical table annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMapping {
    pub class_name: String,
    pub source_table: String,
    #[serde(default)]
    pub primary_key: Option<String>,
}

/// Property to physical column annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMapping {
    pub property_name: String,
    pub domain_class: String,
    pub source_table: String,
    pub source_column: String,
    #[serde(default = "default_range")]
    pub data_type: String,
}

/// Relationship annotation carrying the SQL join condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipMapping {
    pub name: String,
    pub domain_class: String,
    pub range_class: String,
    #[serde(default)]
    pub join_condition: String,
    /// Created from a foreign key that has no ontology counterpart
    #[serde(default)]
    pub synthesized: bool,
}

/// Mapping annotations as returned by the annotation store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingSet {
    #[serde(default)]
    pub classes: Vec<ClassMapping>,
    #[serde(default)]
    pub properties: Vec<PropertyMapping>,
    #[serde(default)]
    pub relationships: Vec<RelationshipMapping>,
}

impl MappingSet {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.properties.is_empty() && self.relationships.is_empty()
    }

    pub fn class_for_table(&self, table: &str) -> Option<&ClassMapping> {
        self.classes
            .iter()
            .find(|c| c.source_table.eq_ignore_ascii_case(table))
    }

    pub fn table_for_class(&self, class_name: &str) -> Option<&str> {
        self.classes
            .iter()
            .find(|c| c.class_name == class_name)
            .map(|c| c.source_table.as_str())
    }

    /// Every distinct physical table referenced by class or property mappings
    pub fn mapped_tables(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut tables = Vec::new();
        let candidates = self
            .classes
            .iter()
            .map(|c| &c.source_table)
            .chain(self.properties.iter().map(|p| &p.source_table));
        for table in candidates {
            if seen.insert(table.to_lowercase()) {
                tables.push(table.clone());
            }
        }
        tables
    }

    /// Mapped class names
    pub fn class_names(&self) -> HashSet<&str> {
        self.classes.iter().map(|c| c.class_name.as_str()).collect()
    }

    /// Mapped property and relationship names
    pub fn property_names(&self) -> HashSet<&str> {
        self.properties
            .iter()
            .map(|p| p.property_name.as_str())
            .chain(self.relationships.iter().map(|r| r.name.as_str()))
            .collect()
    }

    /// Relationship connecting two classes in either direction
    pub fn relationship_between(&self, a: &str, b: &str) -> Option<&RelationshipMapping> {
        self.relationships.iter().find(|r| {
            (r.domain_class == a && r.range_class == b) || (r.domain_class == b && r.range_class == a)
        })
    }
}

/// Per-(tenant, workspace) context cached between requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OntologyContext {
    pub workspace_name: String,
    /// Full ontology as stored
    pub schema: OntologySchema,
    /// Ontology narrowed to the mapped classes and properties
    pub filtered_schema: OntologySchema,
    /// Mappings after table resolution and join augmentation
    pub mappings: MappingSet,
}

/// Body of the ontology import endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OntologyImport {
    #[serde(default)]
    pub workspace_name: Option<String>,
    #[serde(default)]
    pub classes: Vec<OntologyClass>,
    #[serde(default)]
    pub object_properties: Vec<ObjectProperty>,
    #[serde(default)]
    pub data_properties: Vec<DataProperty>,
    #[serde(default)]
    pub mappings: MappingSet,
}

impl OntologyImport {
    pub fn validate(&self) -> Result<(), String> {
        let mut names = HashSet::new();
        for class in &self.classes {
            if class.name.trim().is_empty() {
                return Err("Class name cannot be empty".to_string());
            }
            if !names.insert(class.name.as_str()) {
                return Err(format!("Duplicate class: {}", class.name));
            }
        }
        for mapping in &self.mappings.classes {
            if mapping.source_table.trim().is_empty() {
                return Err(format!("Class mapping for {} has no source table", mapping.class_name));
            }
        }
        for mapping in &self.mappings.properties {
            if mapping.source_column.trim().is_empty() {
                return Err(format!(
                    "Property mapping for {} has no source column",
                    mapping.property_name
                ));
            }
        }
        Ok(())
    }
}
