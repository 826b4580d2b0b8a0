use crate::api::middleware::AppError;
use crate::models::{ColumnFunction, Dialect, InputColumn};

/// Render `function` over an already escaped column expression
pub fn render_function(dialect: Dialect, function: ColumnFunction, expr: &str, distinct: bool) -> String {
    let modifier = if distinct { "DISTINCT " } else { "" };

    match (function, dialect) {
        (ColumnFunction::Year | ColumnFunction::Month | ColumnFunction::Day, Dialect::MySql) => {
            format!("{}({})", function, expr)
        }
        (ColumnFunction::Year | ColumnFunction::Month | ColumnFunction::Day, Dialect::Postgres) => {
            format!("EXTRACT({} FROM {})", function, expr)
        }
        (ColumnFunction::Sum, _) => format!("COALESCE(SUM({}{}), 0)", modifier, expr),
        (ColumnFunction::Count | ColumnFunction::Avg | ColumnFunction::Max | ColumnFunction::Min, _) => {
            format!("{}({}{})", function, modifier, expr)
        }
    }
}

/// Column expression with its function applied, without an alias
pub fn column_expression(dialect: Dialect, column: &InputColumn) -> Result<String, AppError> {
    if column.value.trim().is_empty() {
        return Err(AppError::Validation("Column name cannot be empty".to_string()));
    }

    let escaped = dialect.escape_column(&column.value);
    match column.function {
        Some(ColumnFunction::Count) => Ok(render_function(dialect, ColumnFunction::Count, &escaped, column.distinct)),
        Some(_) if column.value == "*" => Err(AppError::Validation(
            "'*' can only be used with COUNT".to_string(),
        )),
        Some(function) => Ok(render_function(dialect, function, &escaped, column.distinct)),
        None => Ok(escaped),
    }
}

/// Column expression followed by its quoted stable alias
pub fn select_expression(dialect: Dialect, column: &InputColumn) -> Result<String, AppError> {
    let expr = column_expression(dialect, column)?;
    if column.function.is_none() && column.value == "*" {
        return Ok(expr);
    }
    Ok(format!("{} AS {}", expr, dialect.quote_alias(&column.alias())))
}
