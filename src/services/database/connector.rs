// Connector abstraction shared by the MySQL and Postgres drivers
use crate::api::middleware::AppError;
use crate::models::{Dialect, ExecuteResult, IntrospectionResult, SqlValue};
use crate::services::query_builder::BuiltQuery;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
}

/// How a statement must be run: read only, or as a mutation with the bulk guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryIntent {
    pub kind: QueryKind,
    pub allow_bulk_update: bool,
}

impl QueryIntent {
    pub fn select() -> Self {
        Self {
            kind: QueryKind::Select,
            allow_bulk_update: false,
        }
    }

    pub fn insert() -> Self {
        Self {
            kind: QueryKind::Insert,
            allow_bulk_update: false,
        }
    }

    pub fn update(allow_bulk_update: bool) -> Self {
        Self {
            kind: QueryKind::Update,
            allow_bulk_update,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub intent: QueryIntent,
}

impl ExecuteQuery {
    pub fn new(built: BuiltQuery, intent: QueryIntent) -> Self {
        Self {
            sql: built.sql,
            params: built.params,
            intent,
        }
    }
}

/// Timeouts applied by every connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorSettings {
    pub query_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// A live connection to one datasource
#[async_trait::async_trait]
pub trait Connector: Send {
    fn dialect(&self) -> Dialect;

    /// Read tables, columns, keys and references of the configured schema
    async fn inspect_schema(&mut self) -> Result<Vec<IntrospectionResult>, AppError>;

    /// Run one statement under the transaction policy of its intent
    async fn execute_query(&mut self, query: &ExecuteQuery) -> Result<ExecuteResult, AppError>;

    async fn check_connection(&mut self) -> Result<(), AppError>;

    async fn close(&mut self) -> Result<(), AppError>;

    fn is_closed(&self) -> bool;
}

/// Driver-level statement primitives the transaction policy is written against
#[async_trait::async_trait]
pub trait Session: Send {
    fn dialect(&self) -> Dialect;

    /// Run a statement without parameters or results (BEGIN, COMMIT, ...)
    async fn run_statement(&mut self, sql: &str) -> Result<(), AppError>;

    /// Run a row-returning statement and shape its columns
    async fn fetch(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecuteResult, AppError>;

    /// Run a mutation and report the affected row count
    async fn mutate(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, AppError>;
}

/// Generic message returned for any failed connection attempt. The driver
/// error is only logged since it may carry host names or credentials.
pub fn connection_failed(err: impl Display) -> AppError {
    tracing::error!("Database connection failed: {}", err);
    AppError::Connection("Failed to connect to the database".to_string())
}

pub async fn with_timeout<T, F>(timeout: Duration, future: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| AppError::Execution(format!("Query timeout after {} seconds", timeout.as_secs())))?
}

/// Execute `query` on `session`:
/// SELECT runs in a read-only transaction that is always rolled back.
/// INSERT/UPDATE commit on success and roll back on error, or when more than one
/// row was touched without `allow_bulk_update`.
pub async fn execute_with_policy<S>(
    session: &mut S,
    query: &ExecuteQuery,
    timeout: Duration,
) -> Result<ExecuteResult, AppError>
where
    S: Session + ?Sized,
{
    let dialect = session.dialect();

    match query.intent.kind {
        QueryKind::Select => {
            with_timeout(timeout, session.run_statement(dialect.begin_read_only())).await?;
            let result = with_timeout(timeout, session.fetch(&query.sql, &query.params)).await;
            let rollback = with_timeout(timeout, session.run_statement("ROLLBACK")).await;
            tracing::debug!("Read only transaction rolled back");

            let mut result = result?;
            rollback?;
            result.query = query.sql.clone();
            Ok(result)
        }
        QueryKind::Insert | QueryKind::Update => {
            with_timeout(timeout, session.run_statement(dialect.begin())).await?;

            match with_timeout(timeout, session.mutate(&query.sql, &query.params)).await {
                Ok(affected) if affected > 1 && !query.intent.allow_bulk_update => {
                    rollback_quietly(session, timeout).await;
                    tracing::warn!("Rolled back bulk update of {} rows", affected);
                    Err(AppError::Policy(format!(
                        "Bulk update performed without permission ({} rows affected)",
                        affected
                    )))
                }
                Ok(affected) => {
                    with_timeout(timeout, session.run_statement("COMMIT")).await?;
                    tracing::info!("Committed {:?} affecting {} rows", query.intent.kind, affected);
                    Ok(ExecuteResult::mutation(affected, query.sql.clone()))
                }
                Err(err) => {
                    rollback_quietly(session, timeout).await;
                    Err(err)
                }
            }
        }
    }
}

async fn rollback_quietly<S>(session: &mut S, timeout: Duration)
where
    S: Session + ?Sized,
{
    if let Err(err) = with_timeout(timeout, session.run_statement("ROLLBACK")).await {
        tracing::error!("Rollback failed: {}", err);
    }
}
