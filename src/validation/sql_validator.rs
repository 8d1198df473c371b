use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::api::middleware::AppError;

/// Statement-level checks shared by the generator and the mapping validator
pub struct SqlValidator;

impl SqlValidator {
    /// Parse with the generic dialect (closest to the federation engine's ANSI SQL)
    pub fn parse(sql: &str) -> Result<Vec<Statement>, AppError> {
        let dialect = GenericDialect {};
        let mut parser = Parser::new(&dialect)
            .try_with_sql(sql)
            .map_err(|e| AppError::SqlValidation(format!("SQL parsing error: {}", e)))?;

        let ast = parser
            .parse_statements()
            .map_err(|e| AppError::SqlValidation(format!("SQL parsing error: {}", e)))?;

        if ast.is_empty() {
            return Err(AppError::SqlValidation("Empty SQL query".to_string()));
        }

        Ok(ast)
    }

    /// Validate SQL query and ensure it's a single SELECT statement
    pub fn validate_select_only(sql: &str) -> Result<Vec<Statement>, AppError> {
        let ast = Self::parse(sql)?;

        if ast.len() > 1 {
            return Err(AppError::SqlValidation(
                "Multiple statements are not allowed. Generate exactly one SELECT query.".to_string(),
            ));
        }

        match &ast[0] {
            Statement::Query(_) => {}
            Statement::Insert { .. } => {
                return Err(AppError::SqlValidation("INSERT statements are not allowed. Only SELECT queries are permitted.".to_string()));
            }
            Statement::Update { .. } => {
                return Err(AppError::SqlValidation("UPDATE statements are not allowed. Only SELECT queries are permitted.".to_string()));
            }
            Statement::Delete { .. } => {
                return Err(AppError::SqlValidation("DELETE statements are not allowed. Only SELECT queries are permitted.".to_string()));
            }
            Statement::Drop { .. } => {
                return Err(AppError::SqlValidation("DROP statements are not allowed. Only SELECT queries are permitted.".to_string()));
            }
            other => {
                let kind = other.to_string();
                let keyword = kind.split_whitespace().next().unwrap_or("UNKNOWN").to_uppercase();
                return Err(AppError::SqlValidation(format!(
                    "Only SELECT queries are permitted. Found: {}",
                    keyword
                )));
            }
        }

        Ok(ast)
    }

    /// Check if query has a row limit and append one if missing.
    /// Uses AST parsing so that identifiers or comments containing "limit"
    /// are not mistaken for a LIMIT clause.
    pub fn ensure_limit(sql: &str, default_limit: u64) -> Result<String, AppError> {
        let ast = Self::parse(sql)?;

        if Self::check_limit_in_statement(&ast[0]) {
            Ok(sql.to_string())
        } else {
            let trimmed_sql = sql.trim().trim_end_matches(';').trim_end();
            Ok(format!("{} LIMIT {}", trimmed_sql, default_limit))
        }
    }

    /// LIMIT or FETCH FIRST on the outermost query
    fn check_limit_in_statement(stmt: &Statement) -> bool {
        match stmt {
            Statement::Query(query) => query.limit_clause.is_some() || query.fetch.is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_select_only() {
        // Valid SELECT
        assert!(SqlValidator::validate_select_only("SELECT * FROM users").is_ok());
        assert!(SqlValidator::validate_select_only("WITH t AS (SELECT 1 AS x) SELECT x FROM t").is_ok());

        // Invalid INSERT
        assert!(SqlValidator::validate_select_only("INSERT INTO users VALUES (1)").is_err());

        // Invalid UPDATE
        assert!(SqlValidator::validate_select_only("UPDATE users SET name = 'test'").is_err());

        // Invalid DELETE
        assert!(SqlValidator::validate_select_only("DELETE FROM users").is_err());

        // Stacked statements
        assert!(SqlValidator::validate_select_only("SELECT 1; DROP TABLE users").is_err());
    }

    #[test]
    fn test_ensure_limit() {
        // Query without LIMIT
        let sql = "SELECT * FROM users";
        let result = SqlValidator::ensure_limit(sql, 100).unwrap();
        assert_eq!(result, "SELECT * FROM users LIMIT 100");

        // Trailing semicolon is dropped before appending
        let result = SqlValidator::ensure_limit("SELECT * FROM users;", 100).unwrap();
        assert_eq!(result, "SELECT * FROM users LIMIT 100");

        // Query with LIMIT
        let sql = "SELECT * FROM users LIMIT 10";
        let result = SqlValidator::ensure_limit(sql, 100).unwrap();
        assert_eq!(result, sql);

        // Query with FETCH FIRST
        let sql = "SELECT * FROM users FETCH FIRST 5 ROWS ONLY";
        assert_eq!(SqlValidator::ensure_limit(sql, 100).unwrap(), sql);
    }

    #[test]
    fn test_limit_detection_with_ast() {
        // Table name contains "limit"
        assert_eq!(
            SqlValidator::ensure_limit("SELECT * FROM table_limit", 50).unwrap(),
            "SELECT * FROM table_limit LIMIT 50"
        );

        // Column name contains "limit"
        assert_eq!(
            SqlValidator::ensure_limit("SELECT limit_value FROM users", 50).unwrap(),
            "SELECT limit_value FROM users LIMIT 50"
        );

        // Comment contains "LIMIT"
        assert!(SqlValidator::ensure_limit("SELECT * FROM users /* LIMIT */", 50)
            .unwrap()
            .ends_with("LIMIT 50"));

        // LIMIT with OFFSET
        let sql = "SELECT * FROM users LIMIT 100 OFFSET 10";
        assert_eq!(SqlValidator::ensure_limit(sql, 50).unwrap(), sql);

        // Unparseable input is rejected rather than limited
        assert!(SqlValidator::ensure_limit("SELEC * FRM", 50).is_err());
    }
}
