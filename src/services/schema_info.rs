use std::collections::HashMap;

use crate::models::{is_string_type, ColumnInfo, IntrospectionResult, SchemaColumn};

/// Stored inspection snapshots of the tables one query touches, indexed by
/// `table.column`.
#[derive(Debug, Clone, Default)]
pub struct SchemaInfo {
    tables: Vec<IntrospectionResult>,
    index: HashMap<String, (usize, usize)>,
}

impl SchemaInfo {
    pub fn new(tables: Vec<IntrospectionResult>) -> Self {
        let mut index = HashMap::new();
        for (t, table) in tables.iter().enumerate() {
            for (c, column) in table.columns.iter().enumerate() {
                index.insert(format!("{}.{}", table.table_name, column.name), (t, c));
            }
        }
        Self { tables, index }
    }

    pub fn lookup(&self, full: &str) -> Option<&ColumnInfo> {
        self.index
            .get(full)
            .or_else(|| self.index.get(&full.to_lowercase()))
            .map(|&(t, c)| &self.tables[t].columns[c])
    }

    pub fn column_type(&self, full: &str) -> Option<&str> {
        self.lookup(full).map(|c| c.data_type.as_str())
    }

    pub fn is_string_column(&self, full: &str) -> bool {
        self.column_type(full).is_some_and(is_string_type)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.table_name.clone()).collect()
    }

    /// Every known column, table by table in snapshot order
    pub fn all_columns(&self) -> Vec<SchemaColumn> {
        self.tables
            .iter()
            .flat_map(|table| {
                table.columns.iter().map(move |column| SchemaColumn {
                    column: column.name.clone(),
                    table: table.table_name.clone(),
                    full: format!("{}.{}", table.table_name, column.name),
                    data_type: column.data_type.clone(),
                })
            })
            .collect()
    }
}
