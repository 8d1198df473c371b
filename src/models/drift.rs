use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Difference between recorded mappings and the live catalog schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDriftReport {
    pub new_tables: BTreeSet<String>,
    pub removed_tables: BTreeSet<String>,
    /// `table.column` entries present live but not mapped
    pub new_columns: BTreeSet<String>,
    /// `table.column` entries mapped but missing live
    pub removed_columns: BTreeSet<String>,
    pub has_drift: bool,
}

impl SchemaDriftReport {
    pub fn new(
        new_tables: BTreeSet<String>,
        removed_tables: BTreeSet<String>,
        new_columns: BTreeSet<String>,
        removed_columns: BTreeSet<String>,
    ) -> Self {
        let has_drift = !(new_tables.is_empty()
            && removed_tables.is_empty()
            && new_columns.is_empty()
            && removed_columns.is_empty());
        Self {
            new_tables,
            removed_tables,
            new_columns,
            removed_columns,
            has_drift,
        }
    }

    /// Human-readable drift warnings for the response
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for table in &self.removed_tables {
            warnings.push(format!("Schema drift: mapped table {} no longer exists", table));
        }
        for column in &self.removed_columns {
            warnings.push(format!("Schema drift: mapped column {} no longer exists", column));
        }
        if !self.new_tables.is_empty() {
            warnings.push(format!(
                "Schema drift: {} unmapped table(s) found: {}",
                self.new_tables.len(),
                self.new_tables.iter().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        if !self.new_columns.is_empty() {
            warnings.push(format!(
                "Schema drift: {} unmapped column(s) found: {}",
                self.new_columns.len(),
                self.new_columns.iter().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        warnings
    }
}
