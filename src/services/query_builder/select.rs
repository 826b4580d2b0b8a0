use super::filter::render_condition;
use super::functions::{column_expression, select_expression};
use super::{BuiltQuery, Fragment, ParamBag, DEFAULT_LIMIT};
use crate::api::middleware::AppError;
use crate::models::{Dialect, Filter, InputColumn, JoinClause, SortDirection, SqlValue};
use crate::validation::SqlValidator;

/// What an ORDER BY entry points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderTarget {
    /// `table.column` reference, escaped on render
    Column(String),
    /// Alias of a selected function column, quoted on render
    Alias(String),
}

impl OrderTarget {
    fn render(&self, dialect: Dialect) -> String {
        match self {
            OrderTarget::Column(column) => dialect.escape_column(column),
            OrderTarget::Alias(alias) => dialect.quote_alias(alias),
        }
    }
}

/// SELECT builder bound to one table and dialect
#[derive(Debug, Clone)]
pub struct SelectQueryBuilder {
    dialect: Dialect,
    table: String,
    columns: Vec<String>,
    joins: Vec<String>,
    wheres: Vec<Fragment>,
    havings: Vec<Fragment>,
    group_by: Vec<String>,
    order_by: Vec<(OrderTarget, SortDirection)>,
    limit: Option<u64>,
    offset: Option<u64>,
    params: ParamBag,
}

impl SelectQueryBuilder {
    pub fn new(dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            wheres: Vec::new(),
            havings: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            params: ParamBag::default(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Replace the selection. An empty list selects `*`.
    pub fn set_columns(&mut self, columns: &[InputColumn]) -> Result<(), AppError> {
        self.columns = columns
            .iter()
            .map(|c| select_expression(self.dialect, c))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    pub fn add_join(&mut self, join: &JoinClause) -> Result<(), AppError> {
        SqlValidator::validate_join_condition(&join.on, self.dialect)?;

        let mut clause = format!("{} {}", join.join_type.as_sql(), self.dialect.quote_identifier(&join.table));
        if let Some(alias) = join.alias.as_deref().filter(|a| *a != join.table) {
            clause.push_str(&format!(" AS {}", self.dialect.quote_identifier(alias)));
        }
        clause.push_str(&format!(" ON {}", join.on));
        self.joins.push(clause);
        Ok(())
    }

    /// AND a condition into WHERE. Disabled filters are skipped.
    pub fn add_where(&mut self, filter: &Filter) -> Result<(), AppError> {
        if !filter.is_enabled {
            return Ok(());
        }
        let fragment = render_condition(self.dialect, filter, &mut self.params)?;
        self.wheres.push(fragment);
        Ok(())
    }

    /// AND a condition into HAVING. Disabled filters are skipped.
    pub fn add_having(&mut self, filter: &Filter) -> Result<(), AppError> {
        if !filter.is_enabled {
            return Ok(());
        }
        let fragment = render_condition(self.dialect, filter, &mut self.params)?;
        self.havings.push(fragment);
        Ok(())
    }

    pub fn add_group_by(&mut self, column: &InputColumn) -> Result<(), AppError> {
        let expr = column_expression(self.dialect, column)?;
        if !self.group_by.contains(&expr) {
            self.group_by.push(expr);
        }
        Ok(())
    }

    /// Later entries for the same target replace the earlier direction
    pub fn add_order_by(&mut self, target: OrderTarget, direction: SortDirection) {
        if let Some(existing) = self.order_by.iter_mut().find(|(t, _)| *t == target) {
            existing.1 = direction;
        } else {
            self.order_by.push((target, direction));
        }
    }

    pub fn set_limit(&mut self, limit: u64) {
        self.limit = Some(limit);
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    /// Case-insensitive free-text match across `columns`, OR-ed together and
    /// AND-ed into WHERE. A blank term or no columns adds nothing.
    pub fn add_search(&mut self, columns: &[String], term: &str) {
        let term = term.trim();
        if term.is_empty() || columns.is_empty() {
            return;
        }

        let slot = self.params.bind(SqlValue::Text(format!("%{}%", term.to_lowercase())));
        let mut fragment = Fragment::sql("(");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                fragment.push_sql(" OR ");
            }
            fragment.push_sql(format!("LOWER({}) LIKE ", self.dialect.escape_column(column)));
            fragment.push_param(slot);
        }
        fragment.push_sql(")");
        self.wheres.push(fragment);
    }

    pub fn build(&self) -> BuiltQuery {
        let select_list = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };

        let mut fragment = Fragment::sql(format!(
            "SELECT {} FROM {}",
            select_list,
            self.dialect.quote_identifier(&self.table)
        ));

        for join in &self.joins {
            fragment.push_sql(format!(" {}", join));
        }

        if !self.wheres.is_empty() {
            fragment.push_sql(" WHERE ");
            fragment.append(Fragment::join(&self.wheres, " AND "));
        }

        if !self.group_by.is_empty() {
            fragment.push_sql(format!(" GROUP BY {}", self.group_by.join(", ")));
        }

        if !self.havings.is_empty() {
            fragment.push_sql(" HAVING ");
            fragment.append(Fragment::join(&self.havings, " AND "));
        }

        if !self.order_by.is_empty() {
            let entries: Vec<String> = self
                .order_by
                .iter()
                .map(|(target, direction)| format!("{} {}", target.render(self.dialect), direction.as_sql()))
                .collect();
            fragment.push_sql(format!(" ORDER BY {}", entries.join(", ")));
        }

        fragment.push_sql(format!(" LIMIT {}", self.limit.unwrap_or(DEFAULT_LIMIT)));

        if let Some(offset) = self.offset {
            fragment.push_sql(format!(" OFFSET {}", offset));
        }

        let built = fragment.render(self.dialect, &self.params);
        tracing::debug!("Built SELECT: {}", built.sql);
        built
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnFunction, FilterValue, JoinType, OperatorKind};

    #[test]
    fn test_default_limit() {
        let builder = SelectQueryBuilder::new(Dialect::MySql, "users");
        assert_eq!(builder.build().sql, "SELECT * FROM `users` LIMIT 50");
    }

    #[test]
    fn test_explicit_limit_and_offset() {
        let mut builder = SelectQueryBuilder::new(Dialect::Postgres, "users");
        builder.set_limit(21);
        builder.set_offset(40);
        assert_eq!(builder.build().sql, "SELECT * FROM \"users\" LIMIT 21 OFFSET 40");
    }

    #[test]
    fn test_full_select_postgres() {
        let mut builder = SelectQueryBuilder::new(Dialect::Postgres, "orders");
        builder
            .set_columns(&[
                InputColumn::column("users.name"),
                InputColumn::function(ColumnFunction::Sum, "orders.total"),
            ])
            .unwrap();
        builder
            .add_join(&JoinClause {
                table: "users".to_string(),
                alias: None,
                join_type: JoinType::Inner,
                on: "\"users\".\"id\" = \"orders\".\"user_id\"".to_string(),
            })
            .unwrap();
        builder
            .add_where(&Filter::new("orders.status", OperatorKind::Eq, vec![FilterValue::literal("paid")]))
            .unwrap();
        builder
            .add_having(
                &Filter::new("orders.total", OperatorKind::Gt, vec![FilterValue::literal(100i64)])
                    .with_function(ColumnFunction::Sum),
            )
            .unwrap();
        builder
            .add_where(&Filter::new("orders.id", OperatorKind::In, vec![FilterValue::literal(1i64), FilterValue::literal(2i64)]))
            .unwrap();
        builder.add_group_by(&InputColumn::column("users.name")).unwrap();
        builder.add_order_by(OrderTarget::Alias("SUM orders.total".to_string()), SortDirection::Desc);

        let built = builder.build();
        assert_eq!(
            built.sql,
            "SELECT \"users\".\"name\" AS \"users.name\", COALESCE(SUM(\"orders\".\"total\"), 0) AS \"SUM orders.total\" \
             FROM \"orders\" INNER JOIN \"users\" ON \"users\".\"id\" = \"orders\".\"user_id\" \
             WHERE \"orders\".\"status\" = $1 AND \"orders\".\"id\" IN ($2, $3) \
             GROUP BY \"users\".\"name\" \
             HAVING COALESCE(SUM(\"orders\".\"total\"), 0) > $4 \
             ORDER BY \"SUM orders.total\" DESC LIMIT 50"
        );
        assert_eq!(
            built.params,
            vec![SqlValue::from("paid"), SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(100)]
        );
    }

    #[test]
    fn test_disabled_filter_skipped() {
        let mut builder = SelectQueryBuilder::new(Dialect::MySql, "users");
        let mut filter = Filter::new("users.id", OperatorKind::Eq, vec![FilterValue::literal(1i64)]);
        filter.is_enabled = false;
        builder.add_where(&filter).unwrap();
        assert!(!builder.build().sql.contains("WHERE"));
    }

    #[test]
    fn test_search_reuses_one_value() {
        let mut builder = SelectQueryBuilder::new(Dialect::Postgres, "users");
        builder
            .add_where(&Filter::new("users.active", OperatorKind::Eq, vec![FilterValue::literal(1i64)]))
            .unwrap();
        builder.add_search(&["users.name".to_string(), "users.email".to_string()], "  Ann ");

        let built = builder.build();
        assert_eq!(
            built.sql,
            "SELECT * FROM \"users\" WHERE \"users\".\"active\" = $1 AND \
             (LOWER(\"users\".\"name\") LIKE $2 OR LOWER(\"users\".\"email\") LIKE $3) LIMIT 50"
        );
        assert_eq!(
            built.params,
            vec![SqlValue::Int(1), SqlValue::from("%ann%"), SqlValue::from("%ann%")]
        );
    }

    #[test]
    fn test_order_by_deduplicates() {
        let mut builder = SelectQueryBuilder::new(Dialect::MySql, "users");
        builder.add_order_by(OrderTarget::Column("users.id".to_string()), SortDirection::Asc);
        builder.add_order_by(OrderTarget::Column("users.id".to_string()), SortDirection::Desc);
        assert_eq!(builder.build().sql, "SELECT * FROM `users` ORDER BY `users`.`id` DESC LIMIT 50");
    }

    #[test]
    fn test_invalid_join_rejected() {
        let mut builder = SelectQueryBuilder::new(Dialect::MySql, "users");
        let err = builder
            .add_join(&JoinClause {
                table: "orders".to_string(),
                alias: None,
                join_type: JoinType::Left,
                on: "1 = 1; DROP TABLE users".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
