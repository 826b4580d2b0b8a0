use super::{BuiltQuery, Fragment, ParamBag};
use crate::api::middleware::AppError;
use crate::models::{Dialect, MutationValue};
use crate::validation::SqlValidator;

/// Column name without a `table.` qualifier
pub(crate) fn unqualified(column: &str) -> &str {
    column.split_once('.').map(|(_, c)| c).unwrap_or(column)
}

/// Bind a mutation value, or inline it when it is a raw `=expr` escape
pub(crate) fn push_mutation_value(
    fragment: &mut Fragment,
    dialect: Dialect,
    value: &MutationValue,
    bag: &mut ParamBag,
) -> Result<(), AppError> {
    match value.value.raw_expression() {
        Some(raw) => {
            SqlValidator::validate_raw_value(raw, dialect)?;
            fragment.push_sql(raw.trim());
        }
        None => fragment.push_param(bag.bind(value.value.clone())),
    }
    Ok(())
}

/// INSERT builder bound to one table and dialect
#[derive(Debug, Clone)]
pub struct InsertQueryBuilder {
    dialect: Dialect,
    table: String,
    values: Vec<MutationValue>,
}

impl InsertQueryBuilder {
    pub fn new(dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            values: Vec::new(),
        }
    }

    pub fn set_values(&mut self, values: Vec<MutationValue>) {
        self.values = values;
    }

    pub fn build(&self) -> Result<BuiltQuery, AppError> {
        if self.values.is_empty() {
            return Err(AppError::Validation("No values to insert".to_string()));
        }

        let mut bag = ParamBag::default();
        let columns: Vec<String> = self
            .values
            .iter()
            .map(|v| self.dialect.quote_identifier(unqualified(&v.column)))
            .collect();

        let mut fragment = Fragment::sql(format!(
            "INSERT INTO {} ({}) VALUES (",
            self.dialect.quote_identifier(&self.table),
            columns.join(", ")
        ));
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                fragment.push_sql(", ");
            }
            push_mutation_value(&mut fragment, self.dialect, value, &mut bag)?;
        }
        fragment.push_sql(")");

        let built = fragment.render(self.dialect, &bag);
        tracing::debug!("Built INSERT: {}", built.sql);
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SqlValue;

    fn value(column: &str, value: impl Into<SqlValue>) -> MutationValue {
        MutationValue {
            column: column.to_string(),
            value: value.into(),
        }
    }

    #[test]
    fn test_insert_binds_values() {
        let mut builder = InsertQueryBuilder::new(Dialect::Postgres, "users");
        builder.set_values(vec![value("name", "Ann"), value("users.age", 30i64)]);
        let built = builder.build().unwrap();
        assert_eq!(built.sql, "INSERT INTO \"users\" (\"name\", \"age\") VALUES ($1, $2)");
        assert_eq!(built.params, vec![SqlValue::from("Ann"), SqlValue::Int(30)]);
    }

    #[test]
    fn test_raw_values_inlined() {
        let mut builder = InsertQueryBuilder::new(Dialect::MySql, "events");
        builder.set_values(vec![value("created_at", "=NOW()"), value("note", "hi"), value("deleted_at", "=NULL")]);
        let built = builder.build().unwrap();
        assert_eq!(
            built.sql,
            "INSERT INTO `events` (`created_at`, `note`, `deleted_at`) VALUES (NOW(), ?, NULL)"
        );
        assert_eq!(built.params, vec![SqlValue::from("hi")]);
    }

    #[test]
    fn test_dangerous_raw_value_rejected() {
        let mut builder = InsertQueryBuilder::new(Dialect::MySql, "events");
        builder.set_values(vec![value("note", "=1; DROP TABLE events")]);
        assert!(matches!(builder.build(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_empty_insert_rejected() {
        let builder = InsertQueryBuilder::new(Dialect::MySql, "events");
        assert!(matches!(builder.build(), Err(AppError::Validation(_))));
    }
}
