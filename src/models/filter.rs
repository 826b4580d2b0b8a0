use serde::{Deserialize, Serialize};
use std::fmt;

use super::column::{is_date_type, is_numeric_type, is_string_type, ColumnFunction};

/// A scalar value bound into a statement or written into a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_number(&self) -> bool {
        matches!(self, SqlValue::Int(_) | SqlValue::Float(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Raw SQL escape hatch: a text value starting with `=` is inlined without the `=`
    pub fn raw_expression(&self) -> Option<&str> {
        self.as_text().and_then(|s| s.strip_prefix('='))
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterValue {
    pub value: SqlValue,
    /// The value names another column (`table.column`) instead of a literal
    #[serde(default)]
    pub is_column: bool,
}

impl FilterValue {
    pub fn literal(value: impl Into<SqlValue>) -> Self {
        Self {
            value: value.into(),
            is_column: false,
        }
    }
}

/// Closed set of filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorKind {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>")]
    NotEqAnsi,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "NOT LIKE")]
    NotLike,
    #[serde(rename = "CONTAINS")]
    Contains,
    #[serde(rename = "NOT CONTAINS")]
    NotContains,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
}

/// Which operator a string column falls back to when none is given
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringDefault {
    Like,
    Contains,
}

const NUMBER_OPERATORS: &[OperatorKind] = &[
    OperatorKind::Eq,
    OperatorKind::NotEqAnsi,
    OperatorKind::Gt,
    OperatorKind::Gte,
    OperatorKind::Lt,
    OperatorKind::Lte,
    OperatorKind::In,
    OperatorKind::NotIn,
    OperatorKind::IsNull,
    OperatorKind::IsNotNull,
];

const STRING_OPERATORS: &[OperatorKind] = &[
    OperatorKind::Eq,
    OperatorKind::NotEqAnsi,
    OperatorKind::Like,
    OperatorKind::NotLike,
    OperatorKind::Contains,
    OperatorKind::NotContains,
    OperatorKind::In,
    OperatorKind::NotIn,
    OperatorKind::IsNull,
    OperatorKind::IsNotNull,
];

const DATE_OPERATORS: &[OperatorKind] = &[
    OperatorKind::Eq,
    OperatorKind::NotEqAnsi,
    OperatorKind::Gt,
    OperatorKind::Gte,
    OperatorKind::Lt,
    OperatorKind::Lte,
    OperatorKind::IsNull,
    OperatorKind::IsNotNull,
];

const BOOLEAN_OPERATORS: &[OperatorKind] = &[
    OperatorKind::Eq,
    OperatorKind::NotEqAnsi,
    OperatorKind::IsNull,
    OperatorKind::IsNotNull,
];

impl OperatorKind {
    /// Canonical SQL-ish token, also the textual form in the filter language
    pub fn as_sql(&self) -> &'static str {
        match self {
            OperatorKind::Eq => "=",
            OperatorKind::NotEqAnsi => "<>",
            OperatorKind::NotEq => "!=",
            OperatorKind::Gt => ">",
            OperatorKind::Gte => ">=",
            OperatorKind::Lt => "<",
            OperatorKind::Lte => "<=",
            OperatorKind::Like => "LIKE",
            OperatorKind::NotLike => "NOT LIKE",
            OperatorKind::Contains => "CONTAINS",
            OperatorKind::NotContains => "NOT CONTAINS",
            OperatorKind::In => "IN",
            OperatorKind::NotIn => "NOT IN",
            OperatorKind::IsNull => "IS NULL",
            OperatorKind::IsNotNull => "IS NOT NULL",
        }
    }

    /// Human label shown next to the operator
    pub fn label(&self) -> &'static str {
        match self {
            OperatorKind::Eq => "equals",
            OperatorKind::NotEqAnsi | OperatorKind::NotEq => "not equal",
            OperatorKind::Gt => "greater than",
            OperatorKind::Gte => "greater than or equal",
            OperatorKind::Lt => "less than",
            OperatorKind::Lte => "less than or equal",
            OperatorKind::Like => "like",
            OperatorKind::NotLike => "not like",
            OperatorKind::Contains => "contains",
            OperatorKind::NotContains => "not contains",
            OperatorKind::In => "in list",
            OperatorKind::NotIn => "not in list",
            OperatorKind::IsNull => "is null",
            OperatorKind::IsNotNull => "is not null",
        }
    }

    pub fn takes_value(&self) -> bool {
        !matches!(self, OperatorKind::IsNull | OperatorKind::IsNotNull)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, OperatorKind::In | OperatorKind::NotIn)
    }

    /// Operators offered for a declared column type
    pub fn for_type(column_type: &str) -> &'static [OperatorKind] {
        if is_numeric_type(column_type) {
            NUMBER_OPERATORS
        } else if is_date_type(column_type) {
            DATE_OPERATORS
        } else if column_type.eq_ignore_ascii_case("boolean") || column_type.eq_ignore_ascii_case("bool") {
            BOOLEAN_OPERATORS
        } else {
            STRING_OPERATORS
        }
    }

    /// Default operator for a column: `=` unless the column holds text
    pub fn default_for_type(column_type: Option<&str>, string_default: StringDefault) -> Self {
        match column_type {
            Some(t) if is_string_type(t) => match string_default {
                StringDefault::Like => OperatorKind::Like,
                StringDefault::Contains => OperatorKind::Contains,
            },
            _ => OperatorKind::Eq,
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

fn default_true() -> bool {
    true
}

/// A structured filter condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub id: String,
    pub column: String,
    pub operator: OperatorKind,
    #[serde(default)]
    pub value: Vec<FilterValue>,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default, rename = "fn", skip_serializing_if = "Option::is_none")]
    pub function: Option<ColumnFunction>,
}

impl Filter {
    pub fn new(column: impl Into<String>, operator: OperatorKind, value: Vec<FilterValue>) -> Self {
        Self {
            id: String::new(),
            column: column.into(),
            operator,
            value,
            is_enabled: true,
            function: None,
        }
    }

    pub fn with_function(mut self, function: ColumnFunction) -> Self {
        self.function = Some(function);
        self
    }

    /// Aggregated filters belong in HAVING rather than WHERE
    pub fn is_aggregate(&self) -> bool {
        self.function.map(|f| f.is_aggregate()).unwrap_or(false)
    }
}
