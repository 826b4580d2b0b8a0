use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::column::{ColumnFunction, InputColumn};
use super::filter::{Filter, SqlValue};
use super::introspection::ColumnRef;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    #[default]
    Left,
    Inner,
    Right,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Left => "LEFT JOIN",
            JoinType::Inner => "INNER JOIN",
            JoinType::Right => "RIGHT JOIN",
        }
    }
}

/// A join against another table. `on` is a pre-rendered boolean SQL fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, rename = "type")]
    pub join_type: JoinType,
    pub on: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByClause {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

fn default_true() -> bool {
    true
}

/// Filter as typed by the user in the explorer: raw text, optionally in the
/// filter expression language when `is_advanced` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFilter {
    #[serde(default)]
    pub id: String,
    pub column: String,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_advanced: bool,
    #[serde(default, rename = "fn", skip_serializing_if = "Option::is_none")]
    pub function: Option<ColumnFunction>,
}

/// Dialect-agnostic description of a SELECT
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub table: String,
    pub columns: Vec<InputColumn>,
    pub joins: Vec<JoinClause>,
    pub filters: Vec<ClientFilter>,
    pub order_by: Vec<OrderByClause>,
    pub group_by: Vec<InputColumn>,
    pub aggregations: Vec<InputColumn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_all: Option<String>,
}

impl QueryOptions {
    /// Base table followed by join targets
    pub fn tables(&self) -> Vec<String> {
        std::iter::once(self.table.clone())
            .chain(self.joins.iter().map(|j| j.table.clone()))
            .collect()
    }

    /// Explicit selection: group-by plus aggregations when either is present,
    /// the plain column list otherwise
    pub fn selected_columns(&self) -> Vec<InputColumn> {
        if !self.group_by.is_empty() || !self.aggregations.is_empty() {
            self.group_by
                .iter()
                .chain(self.aggregations.iter())
                .cloned()
                .collect()
        } else {
            self.columns.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectRequest {
    #[serde(default)]
    pub datasource_id: String,
    pub opts: QueryOptions,
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationValue {
    pub column: String,
    pub value: SqlValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertRequest {
    #[serde(default)]
    pub datasource_id: String,
    pub table: String,
    pub values: Vec<MutationValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub datasource_id: String,
    pub table: String,
    pub values: Vec<MutationValue>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub allow_bulk_update: bool,
}

/// Lookup of a single row by `column = value` pairs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRequest {
    #[serde(default)]
    pub datasource_id: String,
    pub table: String,
    pub props: BTreeMap<String, SqlValue>,
}

/// Column of a result set, normalized across drivers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultColumn {
    pub column: String,
    #[serde(default)]
    pub table: String,
    pub alias: String,
    pub full: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, rename = "fn", skip_serializing_if = "Option::is_none")]
    pub function: Option<ColumnFunction>,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<ColumnRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_by: Vec<ColumnRef>,
}

impl ResultColumn {
    pub fn new(column: impl Into<String>, table: impl Into<String>, alias: impl Into<String>) -> Self {
        let column = column.into();
        let table = table.into();
        let full = if table.is_empty() {
            column.clone()
        } else {
            format!("{}.{}", table, column)
        };
        Self {
            column,
            table,
            alias: alias.into(),
            full,
            ..Default::default()
        }
    }

    /// Synthetic column reported for INSERT/UPDATE results
    pub fn affected_rows() -> Self {
        Self {
            column: "affectedRows".to_string(),
            table: String::new(),
            alias: "Affected rows".to_string(),
            full: "affectedRows".to_string(),
            ..Default::default()
        }
    }
}

/// Raw outcome of one executed statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Vec<Value>>,
    pub query: String,
}

impl ExecuteResult {
    pub fn mutation(affected: u64, query: String) -> Self {
        Self {
            columns: vec![ResultColumn::affected_rows()],
            rows: vec![vec![Value::from(affected)]],
            query,
        }
    }

    pub fn affected_rows(&self) -> Option<u64> {
        match self.columns.first() {
            Some(c) if c.column == "affectedRows" => {
                self.rows.first().and_then(|r| r.first()).and_then(Value::as_u64)
            }
            _ => None,
        }
    }
}

/// A column known from the stored inspection snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub column: String,
    pub table: String,
    pub full: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectResult {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Vec<Value>>,
    pub all_columns: Vec<SchemaColumn>,
    pub tables: Vec<String>,
    pub query: String,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityResult {
    pub entity: Vec<Value>,
    pub columns: Vec<ResultColumn>,
    pub sql: String,
}
