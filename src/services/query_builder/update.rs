use super::filter::render_condition;
use super::insert::{push_mutation_value, unqualified};
use super::{BuiltQuery, Fragment, ParamBag};
use crate::api::middleware::AppError;
use crate::models::{Dialect, Filter, MutationValue};

/// UPDATE builder bound to one table and dialect
#[derive(Debug, Clone)]
pub struct UpdateQueryBuilder {
    dialect: Dialect,
    table: String,
    set: Vec<MutationValue>,
    wheres: Vec<Fragment>,
    params: ParamBag,
}

impl UpdateQueryBuilder {
    pub fn new(dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            set: Vec::new(),
            wheres: Vec::new(),
            params: ParamBag::default(),
        }
    }

    pub fn set_params(&mut self, values: Vec<MutationValue>) {
        self.set = values;
    }

    pub fn add_where(&mut self, filter: &Filter) -> Result<(), AppError> {
        if !filter.is_enabled {
            return Ok(());
        }
        let fragment = render_condition(self.dialect, filter, &mut self.params)?;
        self.wheres.push(fragment);
        Ok(())
    }

    pub fn build(&self) -> Result<BuiltQuery, AppError> {
        if self.set.is_empty() {
            return Err(AppError::Validation("No values to update".to_string()));
        }

        let mut bag = self.params.clone();
        let mut fragment = Fragment::sql(format!("UPDATE {} SET ", self.dialect.quote_identifier(&self.table)));
        for (i, value) in self.set.iter().enumerate() {
            if i > 0 {
                fragment.push_sql(", ");
            }
            fragment.push_sql(format!("{} = ", self.dialect.quote_identifier(unqualified(&value.column))));
            push_mutation_value(&mut fragment, self.dialect, value, &mut bag)?;
        }

        if !self.wheres.is_empty() {
            fragment.push_sql(" WHERE ");
            fragment.append(Fragment::join(&self.wheres, " AND "));
        }

        let built = fragment.render(self.dialect, &bag);
        tracing::debug!("Built UPDATE: {}", built.sql);
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FilterValue, OperatorKind, SqlValue};

    #[test]
    fn test_set_params_come_before_where_params() {
        let mut builder = UpdateQueryBuilder::new(Dialect::Postgres, "users");
        builder
            .add_where(&Filter::new("users.id", OperatorKind::Eq, vec![FilterValue::literal(7i64)]))
            .unwrap();
        builder.set_params(vec![
            MutationValue {
                column: "name".to_string(),
                value: SqlValue::from("Bob"),
            },
            MutationValue {
                column: "updated_at".to_string(),
                value: SqlValue::from("=NOW()"),
            },
        ]);

        let built = builder.build().unwrap();
        assert_eq!(
            built.sql,
            "UPDATE \"users\" SET \"name\" = $1, \"updated_at\" = NOW() WHERE \"users\".\"id\" = $2"
        );
        assert_eq!(built.params, vec![SqlValue::from("Bob"), SqlValue::Int(7)]);
    }

    #[test]
    fn test_update_without_values_rejected() {
        let builder = UpdateQueryBuilder::new(Dialect::MySql, "users");
        assert!(matches!(builder.build(), Err(AppError::Validation(_))));
    }
}
