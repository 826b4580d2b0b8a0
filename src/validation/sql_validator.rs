use sqlparser::dialect::{Dialect as ParserDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::api::middleware::AppError;
use crate::models::Dialect;

/// Words that may never appear inside a raw `=`-prefixed mutation value
const FORBIDDEN_RAW_TOKENS: &[&str] = &["--", ";", "DROP"];

/// Checks for the few SQL fragments that are inlined rather than bound
pub struct SqlValidator;

impl SqlValidator {
    fn parser_dialect(dialect: Dialect) -> Box<dyn ParserDialect> {
        match dialect {
            Dialect::MySql => Box::new(MySqlDialect {}),
            Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        }
    }

    /// Ensure `sql` is exactly one SQL expression with nothing trailing
    pub fn validate_expression(sql: &str, dialect: Dialect) -> Result<(), AppError> {
        let parser_dialect = Self::parser_dialect(dialect);
        let mut parser = Parser::new(parser_dialect.as_ref())
            .try_with_sql(sql)
            .map_err(|e| AppError::Validation(format!("SQL parsing error: {}", e)))?;

        parser
            .parse_expr()
            .map_err(|e| AppError::Validation(format!("SQL parsing error: {}", e)))?;

        let next = parser.peek_token();
        if next.token != Token::EOF {
            return Err(AppError::Validation(format!(
                "Unexpected trailing input near '{}'",
                next.token
            )));
        }

        Ok(())
    }

    /// Join conditions are rendered verbatim after `ON`
    pub fn validate_join_condition(on: &str, dialect: Dialect) -> Result<(), AppError> {
        if on.trim().is_empty() {
            return Err(AppError::Validation("Join condition cannot be empty".to_string()));
        }
        Self::validate_expression(on, dialect)
            .map_err(|e| AppError::Validation(format!("Invalid join condition '{}': {}", on, e)))
    }

    /// Raw mutation values such as `NOW()` or `NULL` are inlined into INSERT/UPDATE
    pub fn validate_raw_value(raw: &str, dialect: Dialect) -> Result<(), AppError> {
        let upper = raw.to_uppercase();
        if let Some(token) = FORBIDDEN_RAW_TOKENS.iter().find(|t| upper.contains(*t)) {
            return Err(AppError::Validation(format!(
                "Raw value '{}' contains forbidden token '{}'",
                raw, token
            )));
        }
        if raw.trim().is_empty() {
            return Err(AppError::Validation("Raw value cannot be empty".to_string()));
        }
        Self::validate_expression(raw, dialect)
    }
}
