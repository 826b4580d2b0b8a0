use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::api::middleware::AppError;

/// Logical column function: a date part extraction or an aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnFunction {
    Year,
    Month,
    Day,
    Sum,
    Count,
    Avg,
    Max,
    Min,
}

impl ColumnFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnFunction::Year => "YEAR",
            ColumnFunction::Month => "MONTH",
            ColumnFunction::Day => "DAY",
            ColumnFunction::Sum => "SUM",
            ColumnFunction::Count => "COUNT",
            ColumnFunction::Avg => "AVG",
            ColumnFunction::Max => "MAX",
            ColumnFunction::Min => "MIN",
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            ColumnFunction::Sum
                | ColumnFunction::Count
                | ColumnFunction::Avg
                | ColumnFunction::Max
                | ColumnFunction::Min
        )
    }
}

impl FromStr for ColumnFunction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "YEAR" => Ok(ColumnFunction::Year),
            "MONTH" => Ok(ColumnFunction::Month),
            "DAY" => Ok(ColumnFunction::Day),
            "SUM" => Ok(ColumnFunction::Sum),
            "COUNT" => Ok(ColumnFunction::Count),
            "AVG" => Ok(ColumnFunction::Avg),
            "MAX" => Ok(ColumnFunction::Max),
            "MIN" => Ok(ColumnFunction::Min),
            _ => Err(AppError::Validation(format!("Function not allowed: {}", s))),
        }
    }
}

impl TryFrom<String> for ColumnFunction {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnFunction> for String {
    fn from(value: ColumnFunction) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ColumnFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested column: a plain `table.column` reference or a function over one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputColumn {
    pub value: String,
    #[serde(default, rename = "fn", skip_serializing_if = "Option::is_none")]
    pub function: Option<ColumnFunction>,
    #[serde(default)]
    pub distinct: bool,
}

impl InputColumn {
    pub fn column(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            function: None,
            distinct: false,
        }
    }

    pub fn function(function: ColumnFunction, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            function: Some(function),
            distinct: false,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Stable result alias, used to match result columns back to the request
    pub fn alias(&self) -> String {
        match self.function {
            Some(function) if self.distinct => format!("{} distinct {}", function, self.value),
            Some(function) => format!("{} {}", function, self.value),
            None => self.value.clone(),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.function.map(|f| f.is_aggregate()).unwrap_or(false)
    }
}

const STRING_TYPES: &[&str] = &[
    // MySQL
    "char", "varchar", "binary", "varbinary", "blob", "tinytext", "text", "mediumtext",
    "longtext", "enum", "set",
    // PostgreSQL
    "character", "character varying", "citext", "uuid", "xml", "json", "jsonb", "name",
];

const NUMERIC_TYPES: &[&str] = &[
    // MySQL
    "tinyint", "smallint", "mediumint", "int", "integer", "bigint", "decimal", "numeric",
    "float", "double", "real",
    // PostgreSQL
    "double precision", "serial", "bigserial", "smallserial", "money",
];

const DATE_TYPES: &[&str] = &[
    "date", "time", "datetime", "timestamp", "year", "time without time zone",
    "time with time zone", "timestamp without time zone", "timestamp with time zone",
    "interval",
];

fn type_in(list: &[&str], column_type: &str) -> bool {
    let normalized = column_type.trim().to_lowercase();
    list.contains(&normalized.as_str())
}

pub fn is_string_type(column_type: &str) -> bool {
    type_in(STRING_TYPES, column_type)
}

pub fn is_numeric_type(column_type: &str) -> bool {
    type_in(NUMERIC_TYPES, column_type)
}

pub fn is_date_type(column_type: &str) -> bool {
    type_in(DATE_TYPES, column_type)
}
