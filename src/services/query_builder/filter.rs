use super::functions::render_function;
use super::{Fragment, ParamBag};
use crate::api::middleware::AppError;
use crate::models::{Dialect, Filter, FilterValue, OperatorKind, SqlValue};

fn filter_column(dialect: Dialect, filter: &Filter) -> String {
    let escaped = dialect.escape_column(&filter.column);
    match filter.function {
        Some(function) => render_function(dialect, function, &escaped, false),
        None => escaped,
    }
}

fn first_value<'a>(filter: &'a Filter) -> Result<&'a FilterValue, AppError> {
    filter.value.first().ok_or_else(|| {
        AppError::Validation(format!(
            "Filter on '{}' with operator {} requires a value",
            filter.column, filter.operator
        ))
    })
}

fn push_value(fragment: &mut Fragment, dialect: Dialect, value: &FilterValue, bag: &mut ParamBag) {
    match (&value.value, value.is_column) {
        (SqlValue::Text(column), true) => fragment.push_sql(dialect.escape_column(column)),
        _ => fragment.push_param(bag.bind(value.value.clone())),
    }
}

/// Render one condition shared by WHERE and HAVING
pub(crate) fn render_condition(dialect: Dialect, filter: &Filter, bag: &mut ParamBag) -> Result<Fragment, AppError> {
    if filter.column.trim().is_empty() {
        return Err(AppError::Validation("Filter column cannot be empty".to_string()));
    }

    let column = filter_column(dialect, filter);
    let mut fragment = Fragment::sql(format!("{} ", column));

    match filter.operator {
        OperatorKind::IsNull | OperatorKind::IsNotNull => {
            fragment.push_sql(filter.operator.as_sql());
        }
        OperatorKind::In | OperatorKind::NotIn => {
            if filter.value.is_empty() {
                return Err(AppError::Validation(format!(
                    "{} list for '{}' cannot be empty",
                    filter.operator, filter.column
                )));
            }
            fragment.push_sql(format!("{} (", filter.operator.as_sql()));
            for (i, value) in filter.value.iter().enumerate() {
                if i > 0 {
                    fragment.push_sql(", ");
                }
                push_value(&mut fragment, dialect, value, bag);
            }
            fragment.push_sql(")");
        }
        OperatorKind::Like | OperatorKind::NotLike | OperatorKind::Contains | OperatorKind::NotContains => {
            let negated = matches!(filter.operator, OperatorKind::NotLike | OperatorKind::NotContains);
            let raw = first_value(filter)?.value.to_string();
            let pattern = match filter.operator {
                OperatorKind::Contains | OperatorKind::NotContains => format!("%{}%", raw),
                _ => raw,
            };
            fragment.push_sql(format!("{} ", dialect.like_keyword(negated)));
            fragment.push_param(bag.bind(SqlValue::Text(pattern)));
        }
        OperatorKind::Eq
        | OperatorKind::NotEqAnsi
        | OperatorKind::NotEq
        | OperatorKind::Gt
        | OperatorKind::Gte
        | OperatorKind::Lt
        | OperatorKind::Lte => {
            let value = first_value(filter)?;
            fragment.push_sql(format!("{} ", filter.operator.as_sql()));
            push_value(&mut fragment, dialect, value, bag);
        }
    }

    Ok(fragment)
}
