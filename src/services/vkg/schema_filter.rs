use crate::models::{MappingSet, OntologySchema};

/// Narrow the ontology to mapped classes and properties, plus any property
/// whose domain is a mapped class. An empty mapping set (ontology not yet
/// mapped) yields the schema unfiltered.
pub fn filter_schema(schema: &OntologySchema, mappings: &MappingSet) -> OntologySchema {
    if mappings.is_empty() {
        return schema.clone();
    }

    let mapped_classes = mappings.class_names();
    let mapped_properties = mappings.property_names();

    let classes = schema
        .classes
        .iter()
        .filter(|c| mapped_classes.contains(c.name.as_str()))
        .cloned()
        .map(|mut class| {
            if class.table.is_none() {
                class.table = mappings.table_for_class(&class.name).map(str::to_string);
            }
            class
        })
        .collect();

    let object_properties = schema
        .object_properties
        .iter()
        .filter(|p| {
            mapped_properties.contains(p.name.as_str()) || mapped_classes.contains(p.domain.as_str())
        })
        .cloned()
        .collect();

    let data_properties = schema
        .data_properties
        .iter()
        .filter(|p| {
            mapped_properties.contains(p.name.as_str()) || mapped_classes.contains(p.domain.as_str())
        })
        .cloned()
        .collect();

    OntologySchema {
        classes,
        object_properties,
        data_properties,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassMapping, DataProperty, ObjectProperty, OntologyClass, PropertyMapping};

    fn schema() -> OntologySchema {
        OntologySchema {
            classes: vec![
                OntologyClass::new("Customer"),
                OntologyClass::new("Transaction"),
                OntologyClass::new("Supplier"),
            ],
            object_properties: vec![
                ObjectProperty {
                    name: "madeBy".into(),
                    label: None,
                    domain: "Transaction".into(),
                    range: "Customer".into(),
                    description: None,
                },
                ObjectProperty {
                    name: "supplies".into(),
                    label: None,
                    domain: "Supplier".into(),
                    range: "Product".into(),
                    description: None,
                },
            ],
            data_properties: vec![
                DataProperty {
                    name: "customerName".into(),
                    label: None,
                    domain: "Customer".into(),
                    range: "string".into(),
                    description: None,
                },
                DataProperty {
                    name: "supplierRating".into(),
                    label: None,
                    domain: "Supplier".into(),
                    range: "int".into(),
                    description: None,
                },
                DataProperty {
                    name: "legacyCode".into(),
                    label: None,
                    domain: "Warehouse".into(),
                    range: "string".into(),
                    description: None,
                },
            ],
        }
    }

    fn mappings() -> MappingSet {
        MappingSet {
            classes: vec![
                ClassMapping {
                    class_name: "Customer".into(),
                    source_table: "c.s.customers".into(),
                    primary_key: None,
                },
                ClassMapping {
                    class_name: "Transaction".into(),
                    source_table: "c.s.transactions".into(),
                    primary_key: None,
                },
            ],
            properties: vec![PropertyMapping {
                property_name: "legacyCode".into(),
                domain_class: "Customer".into(),
                source_table: "c.s.customers".into(),
                source_column: "legacy_code".into(),
                data_type: "string".into(),
            }],
            relationships: vec![],
        }
    }

    #[test]
    fn test_filter_keeps_only_mapped_elements() {
        let filtered = filter_schema(&schema(), &mappings());
        let classes: Vec<&str> = filtered.classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(classes, vec!["Customer", "Transaction"]);
        assert_eq!(filtered.classes[0].table.as_deref(), Some("c.s.customers"));

        let object: Vec<&str> = filtered.object_properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(object, vec!["madeBy"]);

        let data: Vec<&str> = filtered.data_properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(data, vec!["customerName", "legacyCode"]);
    }

    #[test]
    fn test_filter_never_returns_unmapped_elements() {
        let m = mappings();
        let filtered = filter_schema(&schema(), &m);
        let classes = m.class_names();
        let props = m.property_names();
        for class in &filtered.classes {
            assert!(classes.contains(class.name.as_str()));
        }
        for p in &filtered.data_properties {
            assert!(props.contains(p.name.as_str()) || classes.contains(p.domain.as_str()));
        }
        for p in &filtered.object_properties {
            assert!(props.contains(p.name.as_str()) || classes.contains(p.domain.as_str()));
        }
    }

    #[test]
    fn test_empty_mapping_returns_schema_unfiltered() {
        let s = schema();
        assert_eq!(filter_schema(&s, &MappingSet::default()), s);
    }
}
