use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::DatasourceStore;
use crate::api::middleware::AppError;
use crate::models::{ColumnInfo, ColumnRef, Datasource, DatasourceStatus, IntrospectionResult};

/// Reference data of a column, stored as JSON in `database_columns.meta`
#[derive(Debug, Default, Serialize, Deserialize)]
struct ColumnMeta {
    #[serde(default)]
    refs: Option<ColumnRef>,
    #[serde(default, rename = "referencedBy")]
    referenced_by: Vec<ColumnRef>,
}

/// SQLite storage for datasources and their inspection snapshots
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

fn parse_timestamp(idx: usize, value: String) -> SqliteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn datasource_from_row(row: &Row<'_>) -> SqliteResult<Datasource> {
    let dialect: String = row.get(2)?;
    Ok(Datasource {
        id: row.get(0)?,
        name: row.get(1)?,
        dialect: dialect
            .parse()
            .map_err(|e: AppError| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
        url: row.get(3)?,
        port: row.get(4)?,
        user: row.get(5)?,
        password: row.get(6)?,
        database: row.get(7)?,
        schema: row.get(8)?,
        allow_insert: row.get(9)?,
        allow_update: row.get(10)?,
        status: DatasourceStatus::parse(&row.get::<_, String>(11)?),
        created_at: parse_timestamp(12, row.get(12)?)?,
        last_inspected: row
            .get::<_, Option<String>>(13)?
            .map(|s| parse_timestamp(13, s))
            .transpose()?,
    })
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute("PRAGMA foreign_keys = ON", [])?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS datasources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                dialect TEXT NOT NULL,
                url TEXT NOT NULL,
                port INTEGER,
                user TEXT NOT NULL,
                password TEXT,
                database_name TEXT NOT NULL,
                schema_name TEXT,
                allow_insert INTEGER NOT NULL DEFAULT 0,
                allow_update INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'READY',
                created_at TEXT NOT NULL,
                last_inspected TEXT
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS database_tables (
                id TEXT PRIMARY KEY,
                datasource_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (datasource_id) REFERENCES datasources(id) ON DELETE CASCADE,
                UNIQUE(datasource_id, name)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS database_columns (
                id TEXT PRIMARY KEY,
                table_id TEXT NOT NULL,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                is_primary INTEGER NOT NULL DEFAULT 0,
                position INTEGER NOT NULL,
                meta TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (table_id) REFERENCES database_tables(id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_database_columns_table ON database_columns(table_id, position)",
            [],
        )?;

        Ok(())
    }

    async fn load_table(&self, datasource_id: &str, table: &str) -> Result<Option<IntrospectionResult>, AppError> {
        let conn = self.conn.lock().await;

        let header = conn
            .query_row(
                "SELECT id, name, created_at, updated_at FROM database_tables WHERE datasource_id = ?1 AND name = ?2",
                rusqlite::params![datasource_id, table.to_lowercase()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        parse_timestamp(2, row.get(2)?)?,
                        parse_timestamp(3, row.get(3)?)?,
                    ))
                },
            )
            .optional()?;

        let Some((table_id, name, created_at, updated_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT name, type, is_primary, meta FROM database_columns WHERE table_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(rusqlite::params![table_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut columns = Vec::new();
        for row in rows {
            let (name, data_type, is_primary, meta) = row?;
            let meta: ColumnMeta = serde_json::from_str(&meta)?;
            columns.push(ColumnInfo {
                name,
                data_type,
                is_primary,
                reference: meta.refs,
                referenced_by: meta.referenced_by,
            });
        }

        Ok(Some(IntrospectionResult {
            table_name: name,
            columns,
            created_at,
            updated_at,
        }))
    }
}

#[async_trait::async_trait]
impl DatasourceStore for SqliteStorage {
    async fn get_datasource(&self, id: &str) -> Result<Option<Datasource>, AppError> {
        let conn = self.conn.lock().await;
        let datasource = conn
            .query_row(
                "SELECT id, name, dialect, url, port, user, password, database_name, schema_name,
                        allow_insert, allow_update, status, created_at, last_inspected
                 FROM datasources WHERE id = ?1",
                rusqlite::params![id],
                datasource_from_row,
            )
            .optional()?;
        Ok(datasource)
    }

    async fn save_datasource(&self, datasource: &Datasource) -> Result<(), AppError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO datasources
            (id, name, dialect, url, port, user, password, database_name, schema_name,
             allow_insert, allow_update, status, created_at, last_inspected)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                dialect = excluded.dialect,
                url = excluded.url,
                port = excluded.port,
                user = excluded.user,
                password = excluded.password,
                database_name = excluded.database_name,
                schema_name = excluded.schema_name,
                allow_insert = excluded.allow_insert,
                allow_update = excluded.allow_update,
                status = excluded.status,
                last_inspected = excluded.last_inspected
            "#,
            rusqlite::params![
                datasource.id,
                datasource.name,
                datasource.dialect.as_str(),
                datasource.url,
                datasource.port,
                datasource.user,
                datasource.password,
                datasource.database,
                datasource.schema,
                datasource.allow_insert,
                datasource.allow_update,
                datasource.status.as_str(),
                datasource.created_at.to_rfc3339(),
                datasource.last_inspected.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn set_status(&self, id: &str, status: DatasourceStatus) -> Result<(), AppError> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE datasources SET status = ?1 WHERE id = ?2",
            rusqlite::params![status.as_str(), id],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("Datasource {} not found", id)));
        }
        Ok(())
    }

    async fn mark_inspected(&self, id: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE datasources SET last_inspected = ?1 WHERE id = ?2",
            rusqlite::params![at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    async fn get_inspections(&self, datasource_id: &str, tables: &[String]) -> Result<Vec<IntrospectionResult>, AppError> {
        let mut results = Vec::new();
        for table in tables {
            if let Some(result) = self.load_table(datasource_id, table).await? {
                results.push(result);
            }
        }
        Ok(results)
    }

    async fn replace_inspections(&self, datasource_id: &str, results: &[IntrospectionResult]) -> Result<(), AppError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM database_tables WHERE datasource_id = ?1",
            rusqlite::params![datasource_id],
        )?;

        for result in results {
            let table_id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO database_tables (id, datasource_id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    table_id,
                    datasource_id,
                    result.table_name.to_lowercase(),
                    result.created_at.to_rfc3339(),
                    result.updated_at.to_rfc3339(),
                ],
            )?;

            for (position, column) in result.columns.iter().enumerate() {
                let meta = serde_json::to_string(&ColumnMeta {
                    refs: column.reference.clone(),
                    referenced_by: column.referenced_by.clone(),
                })?;
                tx.execute(
                    "INSERT INTO database_columns (id, table_id, name, type, is_primary, position, meta)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        Uuid::new_v4().to_string(),
                        table_id,
                        column.name,
                        column.data_type,
                        column.is_primary,
                        position as i64,
                        meta,
                    ],
                )?;
            }
        }

        tx.commit()?;
        tracing::debug!("Stored {} table snapshots for datasource {}", results.len(), datasource_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dialect;
    use tempfile::tempdir;

    fn datasource() -> Datasource {
        let mut ds = Datasource::new(
            "shop".to_string(),
            Dialect::Postgres,
            "localhost".to_string(),
            "app".to_string(),
            "shop".to_string(),
        );
        ds.password = Some("cipher".to_string());
        ds.allow_update = true;
        ds
    }

    fn snapshot() -> Vec<IntrospectionResult> {
        vec![
            IntrospectionResult::new(
                "users".to_string(),
                vec![ColumnInfo {
                    name: "id".to_string(),
                    data_type: "integer".to_string(),
                    is_primary: true,
                    reference: None,
                    referenced_by: vec![ColumnRef::new("orders", "user_id")],
                }],
            ),
            IntrospectionResult::new(
                "orders".to_string(),
                vec![
                    ColumnInfo {
                        name: "id".to_string(),
                        data_type: "integer".to_string(),
                        is_primary: true,
                        reference: None,
                        referenced_by: vec![],
                    },
                    ColumnInfo {
                        name: "user_id".to_string(),
                        data_type: "integer".to_string(),
                        is_primary: false,
                        reference: Some(ColumnRef::new("users", "id")),
                        referenced_by: vec![],
                    },
                ],
            ),
        ]
    }

    #[test]
    fn test_sqlite_storage_creation() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let rt = tokio::runtime::Runtime::new().unwrap();
        let storage = rt.block_on(async { SqliteStorage::new(&db_path).await });
        assert!(storage.is_ok());
    }

    #[test]
    fn test_datasource_round_trip() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let storage = SqliteStorage::new(&db_path).await.unwrap();
            let ds = datasource();
            storage.save_datasource(&ds).await.unwrap();

            let loaded = storage.get_datasource(&ds.id).await.unwrap().unwrap();
            assert_eq!(loaded.dialect, Dialect::Postgres);
            assert_eq!(loaded.password.as_deref(), Some("cipher"));
            assert!(loaded.allow_update);
            assert!(!loaded.allow_insert);
            assert_eq!(loaded.status, DatasourceStatus::Ready);

            storage.set_status(&ds.id, DatasourceStatus::Inspecting).await.unwrap();
            let loaded = storage.get_datasource(&ds.id).await.unwrap().unwrap();
            assert_eq!(loaded.status, DatasourceStatus::Inspecting);

            assert!(storage.get_datasource("missing").await.unwrap().is_none());
            assert!(matches!(
                storage.set_status("missing", DatasourceStatus::Failed).await,
                Err(AppError::NotFound(_))
            ));
        });
    }

    #[test]
    fn test_inspections_replace_and_load() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let storage = SqliteStorage::new(&db_path).await.unwrap();
            let ds = datasource();
            storage.save_datasource(&ds).await.unwrap();

            storage.replace_inspections(&ds.id, &snapshot()).await.unwrap();
            // A second run replaces rather than duplicates
            storage.replace_inspections(&ds.id, &snapshot()).await.unwrap();

            let loaded = storage
                .get_inspections(&ds.id, &["orders".to_string(), "Users".to_string(), "missing".to_string()])
                .await
                .unwrap();
            assert_eq!(loaded.len(), 2);
            assert_eq!(loaded[0].table_name, "orders");
            assert_eq!(loaded[0].columns.len(), 2);
            assert_eq!(loaded[0].columns[1].reference, Some(ColumnRef::new("users", "id")));
            assert_eq!(loaded[1].columns[0].referenced_by, vec![ColumnRef::new("orders", "user_id")]);

            let conn = storage.conn.lock().await;
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM database_columns", [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 3);
        });
    }

    #[test]
    fn test_resave_keeps_inspections() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let storage = SqliteStorage::new(&db_path).await.unwrap();
            let mut ds = datasource();
            storage.save_datasource(&ds).await.unwrap();
            storage.replace_inspections(&ds.id, &snapshot()).await.unwrap();

            ds.allow_insert = true;
            ds.password = Some("rotated".to_string());
            storage.save_datasource(&ds).await.unwrap();

            let loaded = storage.get_datasource(&ds.id).await.unwrap().unwrap();
            assert!(loaded.allow_insert);
            assert_eq!(loaded.password.as_deref(), Some("rotated"));

            let tables = storage
                .get_inspections(&ds.id, &["users".to_string(), "orders".to_string()])
                .await
                .unwrap();
            assert_eq!(tables.len(), 2);
        });
    }
}
