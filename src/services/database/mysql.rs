// MySQL connector: one dedicated connection per unit of work
use crate::api::middleware::AppError;
use crate::models::{Dialect, DynamicConnectionConfig, ExecuteResult, IntrospectionResult, ResultColumn, SqlValue};
use crate::services::database::connector::{
    connection_failed, execute_with_policy, with_timeout, Connector, ConnectorSettings, ExecuteQuery, Session,
};
use crate::services::database::introspection::{
    attach_referenced_by, compose_introspection, CatalogColumn, CatalogReference, CatalogSnapshot,
};
use mysql_async::{prelude::*, Conn, OptsBuilder, Params, Row, Value as MySqlValue};
use serde_json::{json, Value};
use std::time::Duration;

impl From<&SqlValue> for MySqlValue {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => MySqlValue::NULL,
            SqlValue::Bool(b) => MySqlValue::Int(i64::from(*b)),
            SqlValue::Int(i) => MySqlValue::Int(*i),
            SqlValue::Float(f) => MySqlValue::Double(*f),
            SqlValue::Text(s) => MySqlValue::Bytes(s.as_bytes().to_vec()),
        }
    }
}

fn to_params(params: &[SqlValue]) -> Params {
    if params.is_empty() {
        Params::Empty
    } else {
        Params::Positional(params.iter().map(MySqlValue::from).collect())
    }
}

fn mysql_value_to_json(value: MySqlValue) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => json!(s),
            Err(_) => json!("<binary>"),
        },
        MySqlValue::Int(i) => json!(i),
        MySqlValue::UInt(u) => json!(u),
        MySqlValue::Float(f) => json!(f),
        MySqlValue::Double(d) => json!(d),
        MySqlValue::Date(y, m, d, 0, 0, 0, 0) => json!(format!("{:04}-{:02}-{:02}", y, m, d)),
        MySqlValue::Date(y, m, d, h, min, s, _) => {
            json!(format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, h, min, s))
        }
        MySqlValue::Time(is_neg, d, h, m, s, _) => {
            let sign = if is_neg { "-" } else { "" };
            let total_hours = d * 24 + h as u32;
            json!(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
        }
    }
}

fn execution_error(err: mysql_async::Error) -> AppError {
    match err {
        mysql_async::Error::Server(server) => {
            tracing::error!("MySQL error {} ({}): {}", server.code, server.state, server.message);
            AppError::Execution(server.message)
        }
        other => {
            tracing::error!("MySQL error: {}", other);
            AppError::Execution(other.to_string())
        }
    }
}

struct MySqlSession {
    conn: Option<Conn>,
}

impl MySqlSession {
    fn conn(&mut self) -> Result<&mut Conn, AppError> {
        self.conn
            .as_mut()
            .ok_or_else(|| AppError::Connection("Connection is closed".to_string()))
    }
}

#[async_trait::async_trait]
impl Session for MySqlSession {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn run_statement(&mut self, sql: &str) -> Result<(), AppError> {
        self.conn()?.query_drop(sql).await.map_err(execution_error)
    }

    async fn fetch(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecuteResult, AppError> {
        let conn = self.conn()?;
        let mut result = conn.exec_iter(sql, to_params(params)).await.map_err(execution_error)?;

        // org_name / org_table point at the source column; computed columns leave them empty
        let columns: Vec<ResultColumn> = result
            .columns()
            .map(|columns| {
                columns
                    .iter()
                    .map(|c| {
                        let name = c.name_str();
                        let org_name = c.org_name_str();
                        if org_name.is_empty() {
                            ResultColumn::new(name.to_string(), "", name.to_string())
                        } else {
                            ResultColumn::new(
                                org_name.to_string(),
                                c.org_table_str().to_lowercase(),
                                name.to_string(),
                            )
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let rows: Vec<Row> = result.collect().await.map_err(execution_error)?;
        let rows = rows
            .into_iter()
            .map(|row| Row::unwrap(row).into_iter().map(mysql_value_to_json).collect())
            .collect();

        Ok(ExecuteResult {
            columns,
            rows,
            query: sql.to_string(),
        })
    }

    async fn mutate(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, AppError> {
        let conn = self.conn()?;
        conn.exec_drop(sql, to_params(params)).await.map_err(execution_error)?;
        Ok(conn.affected_rows())
    }
}

pub struct MySqlConnector {
    session: MySqlSession,
    database: String,
    timeout: Duration,
}

impl MySqlConnector {
    /// Affected rows count matched rows, not changed ones, so the bulk guard
    /// sees every row an UPDATE touches
    fn connect_opts(config: &DynamicConnectionConfig) -> OptsBuilder {
        OptsBuilder::default()
            .ip_or_hostname(config.host())
            .tcp_port(config.port().unwrap_or(3306))
            .user(Some(config.user.clone()))
            .pass(config.password.clone())
            .db_name(Some(config.database.clone()))
            .client_found_rows(true)
    }

    pub async fn connect(config: &DynamicConnectionConfig, settings: &ConnectorSettings) -> Result<Self, AppError> {
        let host = config.host();
        let opts = Self::connect_opts(config);

        let conn = tokio::time::timeout(settings.connect_timeout, Conn::new(opts))
            .await
            .map_err(|_| connection_failed("connect timed out"))?
            .map_err(connection_failed)?;

        tracing::info!("Connected to MySQL {}/{}", host, config.database);

        Ok(Self {
            session: MySqlSession { conn: Some(conn) },
            database: config.database.clone(),
            timeout: settings.query_timeout,
        })
    }

    async fn read_catalog(&mut self) -> Result<CatalogSnapshot, AppError> {
        let database = self.database.clone();
        let conn = self.session.conn()?;

        let tables: Vec<String> = conn.query("SHOW TABLES").await.map_err(execution_error)?;

        let primary_keys: Vec<(String, String)> = conn
            .query(
                "SELECT TABLE_NAME, COLUMN_NAME
                 FROM information_schema.KEY_COLUMN_USAGE
                 WHERE CONSTRAINT_NAME = 'PRIMARY' AND TABLE_SCHEMA = DATABASE()
                 ORDER BY TABLE_NAME, ORDINAL_POSITION",
            )
            .await
            .map_err(execution_error)?;

        let references: Vec<(String, String, String, String)> = conn
            .query(
                "SELECT TABLE_NAME, COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME
                 FROM information_schema.KEY_COLUMN_USAGE
                 WHERE REFERENCED_TABLE_NAME IS NOT NULL AND CONSTRAINT_SCHEMA = DATABASE()",
            )
            .await
            .map_err(execution_error)?;

        let columns: Vec<(String, String, String)> = conn
            .exec(
                "SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE
                 FROM information_schema.COLUMNS
                 WHERE TABLE_SCHEMA = ?
                 ORDER BY TABLE_NAME, ORDINAL_POSITION",
                (database,),
            )
            .await
            .map_err(execution_error)?;

        Ok(CatalogSnapshot {
            tables: tables.into_iter().map(|t| t.to_lowercase()).collect(),
            columns: columns
                .into_iter()
                .map(|(table, name, data_type)| CatalogColumn { table, name, data_type })
                .collect(),
            primary_keys,
            references: references
                .into_iter()
                .map(|(table, column, referenced_table, referenced_column)| CatalogReference {
                    table,
                    column,
                    referenced_table,
                    referenced_column,
                })
                .collect(),
        })
    }
}

#[async_trait::async_trait]
impl Connector for MySqlConnector {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn inspect_schema(&mut self) -> Result<Vec<IntrospectionResult>, AppError> {
        let timeout = self.timeout;
        let catalog = with_timeout(timeout, self.read_catalog()).await?;
        let mut results = compose_introspection(&catalog);
        attach_referenced_by(&mut results);
        tracing::info!("Inspected {} MySQL tables in {}", results.len(), self.database);
        Ok(results)
    }

    async fn execute_query(&mut self, query: &ExecuteQuery) -> Result<ExecuteResult, AppError> {
        execute_with_policy(&mut self.session, query, self.timeout).await
    }

    async fn check_connection(&mut self) -> Result<(), AppError> {
        let timeout = self.timeout;
        let conn = self.session.conn()?;
        with_timeout(timeout, async { conn.ping().await.map_err(execution_error) }).await
    }

    async fn close(&mut self) -> Result<(), AppError> {
        if let Some(conn) = self.session.conn.take() {
            conn.disconnect().await.map_err(execution_error)?;
            tracing::debug!("Closed MySQL connection");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.session.conn.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_conversion() {
        assert!(matches!(to_params(&[]), Params::Empty));
        match to_params(&[SqlValue::Bool(true), SqlValue::from("x"), SqlValue::Null]) {
            Params::Positional(values) => assert_eq!(
                values,
                vec![MySqlValue::Int(1), MySqlValue::Bytes(b"x".to_vec()), MySqlValue::NULL]
            ),
            other => panic!("unexpected params: {:?}", other),
        }
    }

    #[test]
    fn test_connect_opts_count_matched_rows() {
        let config = DynamicConnectionConfig {
            url: "db.internal".to_string(),
            port: Some(3307),
            user: "app".to_string(),
            password: Some("secret".to_string()),
            database: "shop".to_string(),
            schema: None,
        };
        let opts = mysql_async::Opts::from(MySqlConnector::connect_opts(&config));
        assert!(opts.client_found_rows());
        assert_eq!(opts.tcp_port(), 3307);
        assert_eq!(opts.db_name(), Some("shop"));
    }

    #[test]
    fn test_values_to_json() {
        assert_eq!(mysql_value_to_json(MySqlValue::Bytes(b"abc".to_vec())), json!("abc"));
        assert_eq!(mysql_value_to_json(MySqlValue::Date(2024, 3, 9, 0, 0, 0, 0)), json!("2024-03-09"));
        assert_eq!(
            mysql_value_to_json(MySqlValue::Date(2024, 3, 9, 14, 5, 0, 0)),
            json!("2024-03-09 14:05:00")
        );
        assert_eq!(mysql_value_to_json(MySqlValue::Time(true, 1, 2, 3, 4, 0)), json!("-26:03:04"));
        assert_eq!(mysql_value_to_json(MySqlValue::NULL), Value::Null);
    }
}
