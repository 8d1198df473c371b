// Mapping validator
//
// Offline check of generated SQL against the resolved mapping set. Every table
// and column the statement references must be known to the mappings; unknown
// identifiers are hard errors, treated like an engine failure by the caller.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

use serde::Serialize;
use sqlparser::ast::{Expr, Query, SelectItem, SetExpr, TableFactor, Visit, Visitor};

use crate::models::MappingSet;
use crate::services::vkg::sql_fragment::{JoinCondition, TableRef};
use crate::validation::sql_validator::SqlValidator;

/// Niladic functions the parser may surface as bare identifiers
const NILADIC: &[&str] = &[
    "current_date",
    "current_time",
    "current_timestamp",
    "localtime",
    "localtimestamp",
    "current_user",
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Mapped tables the statement touches, fully qualified
    pub referenced_tables: Vec<String>,
}

impl ValidationReport {
    fn failed(error: String) -> Self {
        Self {
            valid: false,
            errors: vec![error],
            ..Default::default()
        }
    }

    /// Catalogs (databases) behind the referenced tables
    pub fn databases(&self) -> Vec<String> {
        let mut databases: Vec<String> = Vec::new();
        for table in &self.referenced_tables {
            if let Some(catalog) = TableRef::parse(table).and_then(|t| t.catalog().map(str::to_string)) {
                if !databases.contains(&catalog) {
                    databases.push(catalog);
                }
            }
        }
        databases
    }

}

#[derive(Debug, Clone)]
struct KnownTable {
    table: TableRef,
    columns: HashSet<String>,
}

/// Static validator over the mapped tables/columns of one request
#[derive(Debug, Clone)]
pub struct MappingValidator {
    tables: Vec<KnownTable>,
    mappings_empty: bool,
}

impl MappingValidator {
    pub fn new(mappings: &MappingSet) -> Self {
        let mut tables: Vec<KnownTable> = Vec::new();

        fn entry<'a>(tables: &'a mut Vec<KnownTable>, raw: &str) -> Option<&'a mut KnownTable> {
            let table = TableRef::parse(raw)?;
            let pos = match tables.iter().position(|k| k.table.key() == table.key()) {
                Some(pos) => pos,
                None => {
                    tables.push(KnownTable {
                        table,
                        columns: HashSet::new(),
                    });
                    tables.len() - 1
                }
            };
            tables.get_mut(pos)
        }

        for class in &mappings.classes {
            if let Some(known) = entry(&mut tables, &class.source_table) {
                if let Some(pk) = &class.primary_key {
                    known.columns.insert(pk.to_lowercase());
                }
            }
        }
        for prop in &mappings.properties {
            if let Some(known) = entry(&mut tables, &prop.source_table) {
                known.columns.insert(prop.source_column.to_lowercase());
            }
        }
        for rel in &mappings.relationships {
            let Some(condition) = JoinCondition::parse(&rel.join_condition) else {
                continue;
            };
            for column in condition.columns() {
                let Some(table) = &column.table else { continue };
                if let Some(known) = tables.iter_mut().find(|k| table.matches(&k.table)) {
                    known.columns.insert(column.column.to_lowercase());
                }
            }
        }

        Self {
            tables,
            mappings_empty: mappings.is_empty(),
        }
    }

    pub fn known_tables(&self) -> Vec<String> {
        self.tables.iter().map(|k| k.table.to_string()).collect()
    }

    /// The mapped table a (possibly partial) reference unambiguously names
    pub fn qualify(&self, reference: &TableRef) -> Option<TableRef> {
        let mut matching = self.tables.iter().filter(|k| reference.matches(&k.table));
        match (matching.next(), matching.next()) {
            (Some(known), None) => Some(known.table.clone()),
            _ => None,
        }
    }

    pub fn validate(&self, sql: &str) -> ValidationReport {
        let statements = match SqlValidator::validate_select_only(sql) {
            Ok(statements) => statements,
            Err(e) => return ValidationReport::failed(e.to_string()),
        };

        let mut collector = ReferenceCollector::default();
        for statement in &statements {
            let _ = statement.visit(&mut collector);
        }

        let mut report = ValidationReport::default();
        if collector.wildcard {
            report
                .warnings
                .push("SELECT * returns every physical column; prefer explicit mapped columns".to_string());
        }
        if collector.comma_join_without_filter {
            report
                .warnings
                .push("Comma-separated FROM without a WHERE clause produces a cartesian product".to_string());
        }

        if self.mappings_empty {
            report.warnings.push(
                "No ontology mappings are available; table and column checks were skipped".to_string(),
            );
            report.valid = true;
            return report;
        }

        let scopes = self.bind_tables(&collector, &mut report);
        self.check_qualified_columns(&collector, &scopes, &mut report);
        self.check_bare_columns(&collector, &scopes, &mut report);

        report.valid = report.errors.is_empty();
        report
    }

    /// Resolve each FROM/JOIN table to a known table and build the alias scope
    fn bind_tables(&self, collector: &ReferenceCollector, report: &mut ValidationReport) -> HashMap<String, Scope> {
        let mut scopes: HashMap<String, Scope> = HashMap::new();
        for name in &collector.derived {
            scopes.insert(name.clone(), Scope::Derived);
        }

        for (raw, alias) in &collector.tables {
            let Some(reference) = TableRef::parse(raw) else {
                report.errors.push(format!("Unrecognised table reference '{}'", raw));
                continue;
            };

            if reference.part_count() == 1 && collector.derived.contains(&reference.key()) {
                if let Some(alias) = alias {
                    scopes.insert(alias.to_lowercase(), Scope::Derived);
                }
                continue;
            }

            let candidates: Vec<usize> = self
                .tables
                .iter()
                .enumerate()
                .filter(|(_, k)| reference.matches(&k.table))
                .map(|(i, _)| i)
                .collect();

            match candidates.as_slice() {
                [idx] => {
                    let known = &self.tables[*idx];
                    let qualified = known.table.to_string();
                    // The engine session has no default catalog or schema
                    if reference.part_count() < known.table.part_count() {
                        report.errors.push(format!(
                            "Table reference '{}' is not fully qualified; use {}",
                            raw, qualified
                        ));
                    }
                    if !report.referenced_tables.contains(&qualified) {
                        report.referenced_tables.push(qualified);
                    }
                    scopes.insert(reference.key(), Scope::Known(*idx));
                    scopes.insert(known.table.key(), Scope::Known(*idx));
                    scopes
                        .entry(known.table.table().to_lowercase())
                        .or_insert(Scope::Known(*idx));
                    if let Some(alias) = alias {
                        scopes.insert(alias.to_lowercase(), Scope::Known(*idx));
                    }
                }
                [] => report.errors.push(format!(
                    "Unknown table '{}'. Use one of the mapped tables: {}",
                    raw,
                    self.known_tables().join(", ")
                )),
                many => report.errors.push(format!(
                    "Table reference '{}' is ambiguous; use the fully-qualified name ({})",
                    raw,
                    many.iter()
                        .map(|i| self.tables[*i].table.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            }
        }
        scopes
    }

    fn check_qualified_columns(
        &self,
        collector: &ReferenceCollector,
        scopes: &HashMap<String, Scope>,
        report: &mut ValidationReport,
    ) {
        for parts in &collector.qualified {
            let Some((column, qualifier)) = parts.split_last() else {
                continue;
            };
            let qualifier_key = qualifier.join(".").to_lowercase();
            let reference = format!("{}.{}", qualifier.join("."), column);

            match scopes.get(&qualifier_key) {
                Some(Scope::Known(idx)) => {
                    let known = &self.tables[*idx];
                    if known.columns.is_empty() {
                        report.warnings.push(format!(
                            "No mapped columns recorded for {}; '{}' was not verified",
                            known.table, reference
                        ));
                    } else if !known.columns.contains(&column.to_lowercase()) {
                        report.errors.push(format!(
                            "Column '{}' does not exist in mapped table {}. Available columns: {}",
                            column,
                            known.table,
                            sorted(&known.columns).join(", ")
                        ));
                    }
                }
                Some(Scope::Derived) => report
                    .warnings
                    .push(format!("'{}' refers to a derived table and was not verified", reference)),
                None => report.errors.push(format!(
                    "Unknown table or alias '{}' in column reference '{}'",
                    qualifier.join("."),
                    reference
                )),
            }
        }
    }

    fn check_bare_columns(
        &self,
        collector: &ReferenceCollector,
        scopes: &HashMap<String, Scope>,
        report: &mut ValidationReport,
    ) {
        let mut in_scope: Vec<usize> = scopes
            .values()
            .filter_map(|s| match s {
                Scope::Known(idx) => Some(*idx),
                Scope::Derived => None,
            })
            .collect();
        in_scope.sort_unstable();
        in_scope.dedup();
        let has_derived = scopes.values().any(|s| matches!(s, Scope::Derived));
        let unverifiable = in_scope.iter().any(|i| self.tables[*i].columns.is_empty());

        for column in &collector.bare {
            let lower = column.to_lowercase();
            if collector.select_aliases.contains(&lower) || NILADIC.contains(&lower.as_str()) {
                continue;
            }
            if in_scope.iter().any(|i| self.tables[*i].columns.contains(&lower)) {
                continue;
            }
            if has_derived || unverifiable {
                report
                    .warnings
                    .push(format!("Column '{}' could not be verified against the mappings", column));
                continue;
            }
            let available: Vec<String> = in_scope
                .iter()
                .flat_map(|i| {
                    let known = &self.tables[*i];
                    sorted(&known.columns)
                        .into_iter()
                        .map(move |c| format!("{}.{}", known.table.table(), c))
                })
                .collect();
            report.errors.push(format!(
                "Column '{}' not found in any referenced table. Available columns: {}",
                column,
                available.join(", ")
            ));
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    Known(usize),
    Derived,
}

fn sorted(columns: &HashSet<String>) -> Vec<String> {
    let mut v: Vec<String> = columns.iter().cloned().collect();
    v.sort();
    v
}

/// Walks the AST collecting table references, aliases and column references
#[derive(Debug, Default)]
struct ReferenceCollector {
    /// (table name as written, alias)
    tables: Vec<(String, Option<String>)>,
    /// CTE names and derived-table aliases, lowercased
    derived: HashSet<String>,
    select_aliases: HashSet<String>,
    qualified: Vec<Vec<String>>,
    bare: Vec<String>,
    wildcard: bool,
    comma_join_without_filter: bool,
}

impl ReferenceCollector {
    fn collect_selects(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                for item in &select.projection {
                    match item {
                        SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => self.wildcard = true,
                        SelectItem::ExprWithAlias { alias, .. } => {
                            self.select_aliases.insert(alias.value.to_lowercase());
                        }
                        _ => {}
                    }
                }
                if select.from.len() > 1 && select.selection.is_none() {
                    self.comma_join_without_filter = true;
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_selects(left);
                self.collect_selects(right);
            }
            _ => {}
        }
    }
}

impl Visitor for ReferenceCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.derived.insert(cte.alias.name.value.to_lowercase());
            }
        }
        self.collect_selects(&query.body);
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                self.tables
                    .push((name.to_string(), alias.as_ref().map(|a| a.name.value.clone())));
            }
            TableFactor::Derived { alias: Some(alias), .. } => {
                self.derived.insert(alias.name.value.to_lowercase());
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => self.bare.push(ident.value.clone()),
            Expr::CompoundIdentifier(idents) => {
                self.qualified
                    .push(idents.iter().map(|i| i.value.clone()).collect());
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}
