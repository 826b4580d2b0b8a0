// Turns raw catalog rows into per-table introspection snapshots
use crate::models::{ColumnInfo, ColumnRef, IntrospectionResult, ReferenceMap};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogColumn {
    pub table: String,
    pub name: String,
    pub data_type: String,
}

/// Foreign key `table.column -> referenced_table.referenced_column`
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogReference {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Everything the catalog queries of one connector returned
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub tables: Vec<String>,
    /// Columns in catalog order
    pub columns: Vec<CatalogColumn>,
    /// `(table, column)` pairs by ordinal position
    pub primary_keys: Vec<(String, String)>,
    pub references: Vec<CatalogReference>,
}

/// One snapshot per table: primary keys first (alphabetical), the rest in
/// catalog order, each column carrying its forward reference.
pub fn compose_introspection(catalog: &CatalogSnapshot) -> Vec<IntrospectionResult> {
    let primary: HashSet<(String, String)> = catalog
        .primary_keys
        .iter()
        .map(|(table, column)| (table.to_lowercase(), column.clone()))
        .collect();

    let references: HashMap<(String, String), ColumnRef> = catalog
        .references
        .iter()
        .map(|r| {
            (
                (r.table.to_lowercase(), r.column.clone()),
                ColumnRef::new(r.referenced_table.to_lowercase(), r.referenced_column.clone()),
            )
        })
        .collect();

    catalog
        .tables
        .iter()
        .map(|table| {
            let table = table.to_lowercase();
            let (mut keys, rest): (Vec<ColumnInfo>, Vec<ColumnInfo>) = catalog
                .columns
                .iter()
                .filter(|c| c.table.to_lowercase() == table)
                .map(|c| {
                    let key = (table.clone(), c.name.clone());
                    ColumnInfo {
                        name: c.name.clone(),
                        data_type: c.data_type.clone(),
                        is_primary: primary.contains(&key),
                        reference: references.get(&key).cloned(),
                        referenced_by: Vec::new(),
                    }
                })
                .partition(|c| c.is_primary);

            keys.sort_by(|a, b| a.name.cmp(&b.name));
            keys.extend(rest);
            IntrospectionResult::new(table, keys)
        })
        .collect()
}

/// Group forward references by their target and attach them to the columns
/// being pointed at. Returns the map keyed by `table.column`.
pub fn attach_referenced_by(results: &mut [IntrospectionResult]) -> ReferenceMap {
    let mut map = ReferenceMap::new();
    for result in results.iter() {
        for column in &result.columns {
            if let Some(target) = &column.reference {
                map.entry(target.key())
                    .or_default()
                    .push(ColumnRef::new(result.table_name.clone(), column.name.clone()));
            }
        }
    }

    for result in results.iter_mut() {
        for column in result.columns.iter_mut() {
            let key = ColumnRef::new(result.table_name.clone(), column.name.clone()).key();
            column.referenced_by = map.get(&key).cloned().unwrap_or_default();
        }
    }

    map
}
