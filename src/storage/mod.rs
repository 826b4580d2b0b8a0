pub mod sqlite;

pub use sqlite::SqliteStorage;

use chrono::{DateTime, Utc};

use crate::api::middleware::AppError;
use crate::models::{Datasource, DatasourceStatus, IntrospectionResult};

/// Persistence the query runner depends on
#[async_trait::async_trait]
pub trait DatasourceStore: Send + Sync {
    async fn get_datasource(&self, id: &str) -> Result<Option<Datasource>, AppError>;

    async fn save_datasource(&self, datasource: &Datasource) -> Result<(), AppError>;

    async fn set_status(&self, id: &str, status: DatasourceStatus) -> Result<(), AppError>;

    async fn mark_inspected(&self, id: &str, at: DateTime<Utc>) -> Result<(), AppError>;

    /// Stored snapshots of the named tables; unknown tables are skipped
    async fn get_inspections(&self, datasource_id: &str, tables: &[String]) -> Result<Vec<IntrospectionResult>, AppError>;

    /// Swap the whole snapshot of a datasource in one transaction
    async fn replace_inspections(&self, datasource_id: &str, results: &[IntrospectionResult]) -> Result<(), AppError>;
}
