// PostgreSQL connector: one dedicated client per unit of work
use crate::api::middleware::AppError;
use crate::models::{Dialect, DynamicConnectionConfig, ExecuteResult, IntrospectionResult, ResultColumn, SqlValue};
use crate::services::database::connector::{
    connection_failed, execute_with_policy, with_timeout, Connector, ConnectorSettings, ExecuteQuery, Session,
};
use crate::services::database::introspection::{
    attach_referenced_by, compose_introspection, CatalogColumn, CatalogReference, CatalogSnapshot,
};
use bytes::BytesMut;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::error::Error;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::types::{to_sql_checked, Format, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row, Statement};

/// Parameters are sent in text format so the server casts them to whatever
/// type the placeholder position infers (int column, numeric aggregate, ...).
impl ToSql for SqlValue {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            other => {
                out.extend_from_slice(other.to_string().as_bytes());
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// NUMERIC decoded from the binary wire format into its exact decimal text
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        decode_numeric(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn decode_numeric(raw: &[u8]) -> Result<String, Box<dyn Error + Sync + Send>> {
    if raw.len() < 8 {
        return Err("invalid numeric header".into());
    }
    let word = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);
    let ndigits = word(0) as usize;
    let weight = word(2) as i16 as i32;
    let sign = word(4);
    let dscale = word(6) as usize;

    if sign == 0xC000 {
        return Ok("NaN".to_string());
    }
    if raw.len() < 8 + ndigits * 2 {
        return Err("invalid numeric digits".into());
    }

    let digits: Vec<u16> = (0..ndigits).map(|i| word(8 + i * 2)).collect();
    let digit_at = |pos: i32| -> u16 {
        if pos >= 0 && (pos as usize) < digits.len() {
            digits[pos as usize]
        } else {
            0
        }
    };

    let mut text = String::new();
    if sign == 0x4000 {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        for pos in 0..=weight {
            if pos == 0 {
                text.push_str(&digit_at(pos).to_string());
            } else {
                text.push_str(&format!("{:04}", digit_at(pos)));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let mut pos = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(pos)));
            pos += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    Ok(text)
}

fn execution_error(err: tokio_postgres::Error) -> AppError {
    match err.as_db_error() {
        Some(db_error) => {
            tracing::error!("PostgreSQL error {}: {}", db_error.code().code(), db_error.message());
            AppError::Execution(db_error.message().to_string())
        }
        None => {
            tracing::error!("PostgreSQL error: {}", err);
            AppError::Execution(err.to_string())
        }
    }
}

fn cell<'a, T, F>(row: &'a Row, idx: usize, to_json: F) -> Result<Value, tokio_postgres::Error>
where
    T: FromSql<'a>,
    F: Fn(T) -> Value,
{
    Ok(row.try_get::<_, Option<T>>(idx)?.map(to_json).unwrap_or(Value::Null))
}

fn cell_to_json(row: &Row, idx: usize, ty: &Type) -> Value {
    let value = match *ty {
        Type::BOOL => cell(row, idx, |v: bool| json!(v)),
        Type::INT2 => cell(row, idx, |v: i16| json!(v)),
        Type::INT4 => cell(row, idx, |v: i32| json!(v)),
        Type::INT8 => cell(row, idx, |v: i64| json!(v)),
        Type::OID => cell(row, idx, |v: u32| json!(v)),
        Type::FLOAT4 => cell(row, idx, |v: f32| json!(v)),
        Type::FLOAT8 => cell(row, idx, |v: f64| json!(v)),
        Type::NUMERIC => cell(row, idx, |v: PgNumeric| json!(v.0)),
        Type::TIMESTAMP => cell(row, idx, |v: chrono::NaiveDateTime| json!(v.to_string())),
        Type::TIMESTAMPTZ => cell(row, idx, |v: chrono::DateTime<chrono::Utc>| json!(v.to_rfc3339())),
        Type::DATE => cell(row, idx, |v: chrono::NaiveDate| json!(v.to_string())),
        Type::TIME => cell(row, idx, |v: chrono::NaiveTime| json!(v.to_string())),
        Type::JSON | Type::JSONB => cell(row, idx, |v: Value| v),
        Type::UUID => cell(row, idx, |v: uuid::Uuid| json!(v.to_string())),
        _ => cell(row, idx, |v: String| json!(v)),
    };

    // Types without a JSON mapping show their type name
    value.unwrap_or_else(|_| json!(format!("<{}>", ty.name())))
}

fn param_refs(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

struct PostgresSession {
    client: Option<Client>,
}

impl PostgresSession {
    fn client(&self) -> Result<&Client, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Connection("Connection is closed".to_string()))
    }

    /// Resolve result columns to their source table and column through
    /// `pg_attribute`. Computed columns keep their output name and no table.
    async fn describe_columns(&self, statement: &Statement) -> Result<Vec<ResultColumn>, AppError> {
        let keys: Vec<String> = statement
            .columns()
            .iter()
            .filter_map(|c| match (c.table_oid(), c.column_id()) {
                (Some(oid), Some(attnum)) => Some(format!("{}-{}", oid, attnum)),
                _ => None,
            })
            .collect();

        let mut sources: HashMap<String, (String, String)> = HashMap::new();
        if !keys.is_empty() {
            let rows = self
                .client()?
                .query(
                    "SELECT c.oid::text || '-' || a.attnum::text AS source_key,
                            LOWER(c.relname) AS table_name,
                            a.attname::text AS column_name
                     FROM pg_catalog.pg_attribute a
                     JOIN pg_catalog.pg_class c ON a.attrelid = c.oid
                     WHERE c.oid::text || '-' || a.attnum::text = ANY($1)",
                    &[&keys],
                )
                .await
                .map_err(execution_error)?;

            for row in rows {
                sources.insert(row.get(0), (row.get(1), row.get(2)));
            }
        }

        Ok(statement
            .columns()
            .iter()
            .map(|c| {
                let source = match (c.table_oid(), c.column_id()) {
                    (Some(oid), Some(attnum)) => sources.get(&format!("{}-{}", oid, attnum)),
                    _ => None,
                };
                match source {
                    Some((table, column)) => ResultColumn::new(column.clone(), table.clone(), c.name()),
                    None => ResultColumn::new(c.name(), "", c.name()),
                }
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl Session for PostgresSession {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn run_statement(&mut self, sql: &str) -> Result<(), AppError> {
        self.client()?.batch_execute(sql).await.map_err(execution_error)
    }

    async fn fetch(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecuteResult, AppError> {
        let client = self.client()?;
        let statement = client.prepare(sql).await.map_err(execution_error)?;
        let rows = client
            .query(&statement, &param_refs(params))
            .await
            .map_err(execution_error)?;

        let columns = self.describe_columns(&statement).await?;
        let rows = rows
            .iter()
            .map(|row| {
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, column)| cell_to_json(row, idx, column.type_()))
                    .collect()
            })
            .collect();

        Ok(ExecuteResult {
            columns,
            rows,
            query: sql.to_string(),
        })
    }

    async fn mutate(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, AppError> {
        self.client()?
            .execute(sql, &param_refs(params))
            .await
            .map_err(execution_error)
    }
}

pub struct PostgresConnector {
    session: PostgresSession,
    connection: JoinHandle<()>,
    schema: String,
    timeout: Duration,
    closed: bool,
}

impl PostgresConnector {
    pub async fn connect(config: &DynamicConnectionConfig, settings: &ConnectorSettings) -> Result<Self, AppError> {
        let host = config.host();
        let mut pg_config = Config::new();
        pg_config
            .host(&host)
            .port(config.port().unwrap_or(5432))
            .user(&config.user)
            .dbname(&config.database)
            .connect_timeout(settings.connect_timeout);
        if let Some(password) = &config.password {
            pg_config.password(password);
        }

        let (client, connection) = pg_config.connect(NoTls).await.map_err(connection_failed)?;
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        let schema = config.schema_or_default().to_string();
        let search_path = format!("SET search_path TO {}", Dialect::Postgres.quote_identifier(&schema));
        if let Err(e) = client.batch_execute(&search_path).await {
            connection.abort();
            return Err(connection_failed(e));
        }

        tracing::info!("Connected to PostgreSQL {}/{} (schema {})", host, config.database, schema);

        Ok(Self {
            session: PostgresSession { client: Some(client) },
            connection,
            schema,
            timeout: settings.query_timeout,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<(), AppError> {
        if self.is_closed() {
            return Err(AppError::Connection("Connection is closed".to_string()));
        }
        Ok(())
    }

    async fn read_catalog(&self) -> Result<CatalogSnapshot, AppError> {
        let client = self.session.client()?;
        let schema = &self.schema;

        let tables = client
            .query("SELECT tablename::text FROM pg_catalog.pg_tables WHERE schemaname = $1::text", &[schema])
            .await
            .map_err(execution_error)?
            .iter()
            .map(|row| row.get::<_, String>(0).to_lowercase())
            .collect();

        let primary_keys = client
            .query(
                "SELECT kcu.table_name::text, kcu.column_name::text
                 FROM information_schema.table_constraints tc
                 JOIN information_schema.key_column_usage kcu
                   ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
                 WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema::text = $1::text
                 ORDER BY kcu.table_name, kcu.ordinal_position",
                &[schema],
            )
            .await
            .map_err(execution_error)?
            .iter()
            .map(|row| (row.get(0), row.get(1)))
            .collect();

        let references = client
            .query(
                "SELECT kcu.table_name::text, kcu.column_name::text, ccu.table_name::text, ccu.column_name::text
                 FROM information_schema.table_constraints tc
                 JOIN information_schema.key_column_usage kcu
                   ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
                 JOIN information_schema.constraint_column_usage ccu
                   ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema
                 WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema::text = $1::text",
                &[schema],
            )
            .await
            .map_err(execution_error)?
            .iter()
            .map(|row| CatalogReference {
                table: row.get(0),
                column: row.get(1),
                referenced_table: row.get(2),
                referenced_column: row.get(3),
            })
            .collect();

        let columns = client
            .query(
                "SELECT table_name::text, column_name::text, data_type::text
                 FROM information_schema.columns
                 WHERE table_schema::text = $1::text
                 ORDER BY table_name, ordinal_position",
                &[schema],
            )
            .await
            .map_err(execution_error)?
            .iter()
            .map(|row| CatalogColumn {
                table: row.get(0),
                name: row.get(1),
                data_type: row.get(2),
            })
            .collect();

        Ok(CatalogSnapshot {
            tables,
            columns,
            primary_keys,
            references,
        })
    }
}

#[async_trait::async_trait]
impl Connector for PostgresConnector {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn inspect_schema(&mut self) -> Result<Vec<IntrospectionResult>, AppError> {
        self.ensure_open()?;
        let catalog = with_timeout(self.timeout, self.read_catalog()).await?;
        let mut results = compose_introspection(&catalog);
        attach_referenced_by(&mut results);
        tracing::info!("Inspected {} PostgreSQL tables in schema {}", results.len(), self.schema);
        Ok(results)
    }

    async fn execute_query(&mut self, query: &ExecuteQuery) -> Result<ExecuteResult, AppError> {
        self.ensure_open()?;
        execute_with_policy(&mut self.session, query, self.timeout).await
    }

    async fn check_connection(&mut self) -> Result<(), AppError> {
        self.ensure_open()?;
        with_timeout(self.timeout, self.session.run_statement("SELECT 1")).await
    }

    async fn close(&mut self) -> Result<(), AppError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Dropping the client sends Terminate; the driver task then runs to completion
        drop(self.session.client.take());
        if tokio::time::timeout(self.timeout, &mut self.connection).await.is_err() {
            tracing::warn!("PostgreSQL connection did not shut down in time, aborting");
            self.connection.abort();
        }
        tracing::debug!("Closed PostgreSQL connection");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
            || self
                .session
                .client
                .as_ref()
                .map_or(true, |client| client.is_closed())
    }
}
