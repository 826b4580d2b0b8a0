// Dialect-aware SELECT / INSERT / UPDATE builders
pub mod dialect;
pub mod filter;
pub mod functions;
pub mod insert;
pub mod select;
pub mod update;

pub use insert::InsertQueryBuilder;
pub use select::{OrderTarget, SelectQueryBuilder};
pub use update::UpdateQueryBuilder;

use serde::Serialize;

use crate::models::{Dialect, SqlValue};

/// Default row cap for a SELECT without an explicit limit
pub const DEFAULT_LIMIT: u64 = 50;

/// Final statement text with its positional parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Sql(String),
    Param(usize),
}

/// SQL text with parameter slots. Slots refer to a builder's `ParamBag` by
/// index and become placeholders only when the statement is rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Fragment {
    parts: Vec<Part>,
}

impl Fragment {
    pub(crate) fn sql(text: impl Into<String>) -> Self {
        let mut fragment = Self::default();
        fragment.push_sql(text);
        fragment
    }

    pub(crate) fn push_sql(&mut self, text: impl Into<String>) {
        let text = text.into();
        if let Some(Part::Sql(last)) = self.parts.last_mut() {
            last.push_str(&text);
        } else {
            self.parts.push(Part::Sql(text));
        }
    }

    pub(crate) fn push_param(&mut self, index: usize) {
        self.parts.push(Part::Param(index));
    }

    pub(crate) fn append(&mut self, other: Fragment) {
        for part in other.parts {
            match part {
                Part::Sql(text) => self.push_sql(text),
                Part::Param(index) => self.push_param(index),
            }
        }
    }

    /// Join fragments with a separator
    pub(crate) fn join(fragments: &[Fragment], separator: &str) -> Fragment {
        let mut joined = Fragment::default();
        for (i, fragment) in fragments.iter().enumerate() {
            if i > 0 {
                joined.push_sql(separator);
            }
            joined.append(fragment.clone());
        }
        joined
    }

    /// Emit placeholders in text order, pulling values out of `bag` to match
    pub(crate) fn render(self, dialect: Dialect, bag: &ParamBag) -> BuiltQuery {
        let mut sql = String::new();
        let mut params = Vec::new();

        for part in self.parts {
            match part {
                Part::Sql(text) => sql.push_str(&text),
                Part::Param(index) => {
                    params.push(bag.get(index));
                    sql.push_str(&dialect.placeholder(params.len()));
                }
            }
        }

        BuiltQuery { sql, params }
    }
}

/// Values bound by one builder instance; indexes only ever grow
#[derive(Debug, Clone, Default)]
pub(crate) struct ParamBag {
    values: Vec<SqlValue>,
}

impl ParamBag {
    pub(crate) fn bind(&mut self, value: SqlValue) -> usize {
        self.values.push(value);
        self.values.len() - 1
    }

    fn get(&self, index: usize) -> SqlValue {
        self.values.get(index).cloned().unwrap_or(SqlValue::Null)
    }
}
