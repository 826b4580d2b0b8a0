use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Points at a column in another table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub field: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}.{}", self.table, self.field)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub is_primary: bool,
    /// Forward reference (foreign key) of this column
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<ColumnRef>,
    /// Columns elsewhere that reference this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_by: Vec<ColumnRef>,
}

/// Snapshot of one table's structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrospectionResult {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntrospectionResult {
    pub fn new(table_name: String, columns: Vec<ColumnInfo>) -> Self {
        let now = Utc::now();
        Self {
            table_name,
            columns,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// `"table.column"` -> columns referencing it
pub type ReferenceMap = HashMap<String, Vec<ColumnRef>>;
