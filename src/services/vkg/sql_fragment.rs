// Typed SQL fragments
//
// Table references, column references and equi-join conditions as values,
// so that table resolution and exploration queries never splice raw strings.

use std::fmt;

use crate::models::ForeignKey;

const RESERVED: &[&str] = &[
    "select", "from", "where", "group", "order", "by", "limit", "table", "user", "date", "time",
    "timestamp", "key", "value", "join", "on", "and", "or", "not", "as", "in", "is", "null",
];

/// Quote an identifier when it is not a plain lowercase-safe word
pub fn quote_ident(ident: &str) -> String {
    let simple = !ident.is_empty()
        && ident
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
        && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple && !RESERVED.contains(&ident.to_lowercase().as_str()) {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// Split a dotted name, honouring double-quoted segments
fn split_dotted(raw: &str) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = raw.trim().chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            c if c.is_whitespace() && !in_quotes => return None,
            c => current.push(c),
        }
    }
    if in_quotes {
        return None;
    }
    parts.push(current);

    if parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(parts)
}

/// A one-, two- or three-part table reference (`[catalog.][schema.]table`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    parts: Vec<String>,
}

impl TableRef {
    pub fn new(catalog: &str, schema: &str, table: &str) -> Self {
        Self {
            parts: vec![catalog.to_string(), schema.to_string(), table.to_string()],
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let parts = split_dotted(raw)?;
        if parts.len() > 3 {
            return None;
        }
        Some(Self { parts })
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn is_fully_qualified(&self) -> bool {
        self.parts.len() == 3
    }

    pub fn catalog(&self) -> Option<&str> {
        (self.parts.len() == 3).then(|| self.parts[0].as_str())
    }

    pub fn schema(&self) -> Option<&str> {
        match self.parts.len() {
            3 => Some(self.parts[1].as_str()),
            2 => Some(self.parts[0].as_str()),
            _ => None,
        }
    }

    pub fn table(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or_default()
    }

    /// Prefix a two-part reference with a catalog; other shapes are returned unchanged
    pub fn with_catalog(&self, catalog: &str) -> Self {
        if self.parts.len() != 2 {
            return self.clone();
        }
        let mut parts = Vec::with_capacity(3);
        parts.push(catalog.to_string());
        parts.extend(self.parts.iter().cloned());
        Self { parts }
    }

    /// Case-insensitive suffix match: `customers` and `sales.customers` both
    /// match `cat.sales.customers`
    pub fn matches(&self, qualified: &TableRef) -> bool {
        if self.parts.len() > qualified.parts.len() {
            return false;
        }
        let offset = qualified.parts.len() - self.parts.len();
        self.parts
            .iter()
            .zip(&qualified.parts[offset..])
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Lowercased dotted key for lookups
    pub fn key(&self) -> String {
        self.parts.join(".").to_lowercase()
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.parts.iter().map(|p| quote_ident(p)).collect();
        write!(f, "{}", rendered.join("."))
    }
}

/// A column, optionally qualified by its table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: Option<TableRef>,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: TableRef, column: &str) -> Self {
        Self {
            table: Some(table),
            column: column.to_string(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = split_dotted(raw)?;
        if parts.len() > 4 {
            return None;
        }
        let column = parts.pop()?;
        let table = if parts.is_empty() {
            None
        } else {
            Some(TableRef { parts })
        };
        Some(Self { table, column })
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, quote_ident(&self.column)),
            None => write!(f, "{}", quote_ident(&self.column)),
        }
    }
}

/// Conjunction of column equalities, e.g. `a.x = b.y AND a.z = b.w`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCondition {
    pairs: Vec<(ColumnRef, ColumnRef)>,
}

impl JoinCondition {
    pub fn equi(left: ColumnRef, right: ColumnRef) -> Self {
        Self {
            pairs: vec![(left, right)],
        }
    }

    pub fn from_foreign_key(fk: &ForeignKey) -> Option<Self> {
        let from = TableRef::parse(&fk.from_table)?;
        let to = TableRef::parse(&fk.to_table)?;
        Some(Self::equi(
            ColumnRef::new(from, &fk.from_column),
            ColumnRef::new(to, &fk.to_column),
        ))
    }

    /// Parse `lhs = rhs [AND lhs = rhs]*` where every side is table-qualified
    pub fn parse(raw: &str) -> Option<Self> {
        let mut pairs = Vec::new();
        for clause in split_and(raw) {
            let (left, right) = clause.split_once('=')?;
            let left = ColumnRef::parse(left.trim())?;
            let right = ColumnRef::parse(right.trim())?;
            if left.table.is_none() || right.table.is_none() {
                return None;
            }
            pairs.push((left, right));
        }
        if pairs.is_empty() {
            return None;
        }
        Some(Self { pairs })
    }

    pub fn tables(&self) -> Vec<&TableRef> {
        let mut tables: Vec<&TableRef> = Vec::new();
        for (l, r) in &self.pairs {
            for t in [l.table.as_ref(), r.table.as_ref()].into_iter().flatten() {
                if !tables.contains(&t) {
                    tables.push(t);
                }
            }
        }
        tables
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnRef> {
        self.pairs.iter().flat_map(|(l, r)| [l, r])
    }

    /// Rewrite every table reference
    pub fn map_tables(&self, f: impl Fn(&TableRef) -> TableRef) -> Self {
        let map_col = |c: &ColumnRef| ColumnRef {
            table: c.table.as_ref().map(&f),
            column: c.column.clone(),
        };
        Self {
            pairs: self.pairs.iter().map(|(l, r)| (map_col(l), map_col(r))).collect(),
        }
    }

    /// Same column pairs irrespective of side order or case
    pub fn equivalent(&self, other: &JoinCondition) -> bool {
        let normalize = |c: &JoinCondition| {
            let mut keys: Vec<String> = c
                .pairs
                .iter()
                .map(|(l, r)| {
                    let mut sides = [l.to_string().to_lowercase(), r.to_string().to_lowercase()];
                    sides.sort();
                    sides.join("=")
                })
                .collect();
            keys.sort();
            keys
        };
        normalize(self) == normalize(other)
    }
}

impl fmt::Display for JoinCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .pairs
            .iter()
            .map(|(l, r)| format!("{} = {}", l, r))
            .collect();
        write!(f, "{}", rendered.join(" AND "))
    }
}

fn split_and(raw: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let lower = raw.to_ascii_lowercase();
    let mut start = 0;
    let mut search = 0;
    while let Some(pos) = lower[search..].find(" and ") {
        let at = search + pos;
        clauses.push(raw[start..at].trim());
        start = at + 5;
        search = start;
    }
    clauses.push(raw[start..].trim());
    clauses.into_iter().filter(|c| !c.is_empty()).collect()
}

/// `SELECT col, COUNT(*) ... GROUP BY col ORDER BY COUNT(*) DESC LIMIT n`
pub fn distinct_values_query(table: &TableRef, column: &str, limit: u64) -> String {
    let col = quote_ident(column);
    format!(
        "SELECT {col}, COUNT(*) AS value_count FROM {table} GROUP BY {col} ORDER BY COUNT(*) DESC LIMIT {limit}",
        col = col,
        table = table,
        limit = limit
    )
}

pub fn row_count_query(table: &TableRef) -> String {
    format!("SELECT COUNT(*) AS total_rows FROM {}", table)
}
