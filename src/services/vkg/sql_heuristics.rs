// SQL heuristics
//
// Pattern-based recovery of table aliases and WHERE-clause filter columns
// from generated SQL, used when a query returns no rows. Conditions the
// patterns do not recognise are ignored.

use regex::Regex;
use std::sync::LazyLock;

use crate::services::vkg::sql_fragment::TableRef;

const IDENT: &str = r#"(?:"[^"]+"|[A-Za-z_][A-Za-z0-9_]*)"#;

static TABLE_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:FROM|JOIN)\s+({ident}(?:\.{ident}){{0,2}})(?:\s+(?:AS\s+)?([A-Za-z_][A-Za-z0-9_]*))?",
        ident = IDENT
    ))
    .expect("valid regex")
});

static WHERE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bWHERE\b(.*?)(?:\bGROUP\s+BY\b|\bORDER\s+BY\b|\bHAVING\b|\bLIMIT\b|\bFETCH\b|$)")
        .expect("valid regex")
});

static QUALIFIED_CONDITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\s*(?:=|<>|!=|>=|<=|>|<|\bLIKE\b|\bILIKE\b|\bIN\b|\bBETWEEN\b|\bNOT\b|\bIS\b)",
    )
    .expect("valid regex")
});

/// Words that can follow a table name but are never aliases
const NOT_ALIASES: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "outer", "cross", "on", "using", "group", "order",
    "having", "limit", "fetch", "union", "except", "intersect", "natural", "offset", "window",
];

/// Column used in a WHERE condition, resolved to its table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterColumn {
    pub table: TableRef,
    pub column: String,
}

/// Recovers filter columns from SQL text
pub trait FilterExtractor: Send + Sync {
    /// `(alias, table)` pairs from FROM and JOIN clauses; unaliased tables
    /// are keyed by their bare table name
    fn table_aliases(&self, sql: &str) -> Vec<(String, TableRef)>;

    /// Distinct `alias.column <op>` filter columns of the WHERE clause
    fn filter_columns(&self, sql: &str) -> Vec<FilterColumn>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexFilterExtractor;

impl FilterExtractor for RegexFilterExtractor {
    fn table_aliases(&self, sql: &str) -> Vec<(String, TableRef)> {
        let mut aliases = Vec::new();
        for captures in TABLE_SOURCE.captures_iter(sql) {
            let Some(table) = TableRef::parse(&captures[1]) else {
                continue;
            };
            let alias = captures
                .get(2)
                .map(|m| m.as_str())
                .filter(|a| !NOT_ALIASES.contains(&a.to_lowercase().as_str()))
                .map(str::to_string)
                .unwrap_or_else(|| table.table().to_string());
            aliases.push((alias, table));
        }
        aliases
    }

    fn filter_columns(&self, sql: &str) -> Vec<FilterColumn> {
        let aliases = self.table_aliases(sql);
        let Some(where_clause) = WHERE_CLAUSE.captures(sql).and_then(|c| c.get(1)) else {
            return Vec::new();
        };

        let mut columns: Vec<FilterColumn> = Vec::new();
        for captures in QUALIFIED_CONDITION.captures_iter(where_clause.as_str()) {
            let qualifier = &captures[1];
            let column = &captures[2];
            let table = aliases
                .iter()
                .find(|(alias, _)| alias.eq_ignore_ascii_case(qualifier))
                .or_else(|| aliases.iter().find(|(_, t)| t.table().eq_ignore_ascii_case(qualifier)))
                .map(|(_, t)| t.clone());
            let Some(table) = table else {
                tracing::debug!("Filter qualifier {} does not match any table", qualifier);
                continue;
            };
            let candidate = FilterColumn {
                table,
                column: column.to_string(),
            };
            let seen = columns
                .iter()
                .any(|c| c.table == candidate.table && c.column.eq_ignore_ascii_case(&candidate.column));
            if !seen {
                columns.push(candidate);
            }
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_aliases() {
        let sql = "SELECT c.name FROM acme_sales.sales.customers c \
                   JOIN acme_sales.sales.transactions AS t ON t.customer_id = c.id WHERE t.amount > 10";
        let aliases = RegexFilterExtractor.table_aliases(sql);
        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases[0].0, "c");
        assert_eq!(aliases[0].1.to_string(), "acme_sales.sales.customers");
        assert_eq!(aliases[1].0, "t");
    }

    #[test]
    fn test_unaliased_table_uses_table_name() {
        let aliases = RegexFilterExtractor.table_aliases("SELECT name FROM sales.customers WHERE customers.segment = 'SMB'");
        assert_eq!(aliases[0].0, "customers");

        let columns = RegexFilterExtractor.filter_columns("SELECT name FROM sales.customers WHERE customers.segment = 'SMB'");
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].column, "segment");
    }

    #[test]
    fn test_filter_columns_are_distinct() {
        let sql = "SELECT c.name FROM acme_sales.sales.customers c \
                   JOIN acme_sales.sales.transactions t ON t.customer_id = c.id \
                   WHERE c.segment = 'Enterprise' AND t.amount > 10000 AND c.segment <> 'SMB' \
                   ORDER BY c.name LIMIT 100";
        let columns = RegexFilterExtractor.filter_columns(sql);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].column, "segment");
        assert_eq!(columns[0].table.table(), "customers");
        assert_eq!(columns[1].column, "amount");
        assert_eq!(columns[1].table.table(), "transactions");
    }

    #[test]
    fn test_unmatched_conditions_are_ignored() {
        let columns = RegexFilterExtractor.filter_columns("SELECT name FROM customers WHERE amount > 5");
        assert!(columns.is_empty());
        let columns = RegexFilterExtractor.filter_columns("SELECT x.a FROM t WHERE x.a = 1");
        assert!(columns.is_empty());
        assert!(RegexFilterExtractor.filter_columns("SELECT 1").is_empty());
    }
}
