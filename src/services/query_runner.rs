use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::api::middleware::AppError;
use crate::config::RunnerConfig;
use crate::models::{
    ClientFilter, ColumnRef, Datasource, DatasourceStatus, Dialect, DynamicConnectionConfig, EntityRequest,
    EntityResult, ExecuteResult, Filter, FilterValue, InputColumn, InsertRequest, IntrospectionResult,
    OperatorKind, OrderByClause, ResultColumn, SelectRequest, SelectResult, SortDirection, StringDefault,
    UpdateRequest,
};
use crate::services::connection_manager::ConnectionManager;
use crate::services::database::{ExecuteQuery, QueryIntent};
use crate::services::filter_parser::FilterParser;
use crate::services::query_builder::{InsertQueryBuilder, OrderTarget, SelectQueryBuilder, UpdateQueryBuilder};
use crate::services::schema_info::SchemaInfo;
use crate::storage::DatasourceStore;

/// Turns stored datasource passwords into plaintext right before connecting
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plain: &str) -> Result<String, AppError>;
    fn decrypt(&self, stored: &str) -> Result<String, AppError>;
}

/// Stores passwords as given
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

impl CredentialCipher for PassthroughCipher {
    fn encrypt(&self, plain: &str) -> Result<String, AppError> {
        Ok(plain.to_string())
    }

    fn decrypt(&self, stored: &str) -> Result<String, AppError> {
        Ok(stored.to_string())
    }
}

/// A running background inspection. Awaiting it is optional.
pub struct InspectionHandle {
    handle: JoinHandle<Result<usize, AppError>>,
}

impl InspectionHandle {
    /// Wait for the inspection and return the number of tables stored
    pub async fn wait(self) -> Result<usize, AppError> {
        self.handle
            .await
            .map_err(|e| AppError::Internal(format!("Inspection task failed: {}", e)))?
    }
}

/// Largest page a SELECT may request
pub const MAX_PAGE_SIZE: usize = 1000;

/// Datasources with an inspection running. An id stays claimed until its
/// guard is dropped at the end of the inspection task.
#[derive(Clone, Default)]
struct InflightInspections(Arc<Mutex<HashSet<String>>>);

impl InflightInspections {
    fn claim(&self, datasource_id: &str) -> Option<InflightGuard> {
        let mut ids = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(datasource_id.to_string()) {
            return None;
        }
        Some(InflightGuard {
            inspections: self.clone(),
            datasource_id: datasource_id.to_string(),
        })
    }
}

struct InflightGuard {
    inspections: InflightInspections,
    datasource_id: String,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inspections
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.datasource_id);
    }
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub default_page_size: usize,
    pub docker_mode: bool,
}

impl From<&RunnerConfig> for RunnerSettings {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            default_page_size: config.default_page_size,
            docker_mode: config.docker_mode,
        }
    }
}

/// Executes structured queries against registered datasources
#[derive(Clone)]
pub struct QueryRunner {
    store: Arc<dyn DatasourceStore>,
    connections: ConnectionManager,
    cipher: Arc<dyn CredentialCipher>,
    settings: RunnerSettings,
    inspections: InflightInspections,
}

impl QueryRunner {
    pub fn new(
        store: Arc<dyn DatasourceStore>,
        connections: ConnectionManager,
        cipher: Arc<dyn CredentialCipher>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            connections,
            cipher,
            settings,
            inspections: InflightInspections::default(),
        }
    }

    fn effective_config(&self, config: DynamicConnectionConfig) -> DynamicConnectionConfig {
        if self.settings.docker_mode {
            config.with_docker_host()
        } else {
            config
        }
    }

    async fn resolve(&self, datasource_id: &str) -> Result<(Datasource, DynamicConnectionConfig), AppError> {
        tracing::debug!("Resolving datasource {}", datasource_id);
        let datasource = self
            .store
            .get_datasource(datasource_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Datasource not found".to_string()))?;

        let password = datasource
            .password
            .as_deref()
            .map(|p| self.cipher.decrypt(p))
            .transpose()?;
        let config = self.effective_config(datasource.connection_config(password));
        Ok((datasource, config))
    }

    /// Run one statement inside its own unit of work
    async fn execute(
        &self,
        dialect: Dialect,
        config: &DynamicConnectionConfig,
        query: ExecuteQuery,
    ) -> Result<ExecuteResult, AppError> {
        tracing::debug!("Executing: {}", query.sql);
        let mut scope = self.connections.scope();
        let result = async {
            let connector = scope.acquire(dialect, config).await?;
            connector.execute_query(&query).await
        }
        .await;
        scope.close_all().await;
        result
    }

    #[tracing::instrument(skip_all, fields(datasource = %request.datasource_id, table = %request.opts.table))]
    pub async fn run_select(&self, request: &SelectRequest) -> Result<SelectResult, AppError> {
        let opts = &request.opts;
        if opts.table.trim().is_empty() {
            return Err(AppError::Validation("Table is required".to_string()));
        }

        let (datasource, config) = self.resolve(&request.datasource_id).await?;
        let dialect = datasource.dialect;
        let tables = opts.tables();
        let schema = SchemaInfo::new(self.store.get_inspections(&datasource.id, &tables).await?);

        tracing::debug!("Building SELECT");
        let (size, offset) = page_window(request.size.unwrap_or(self.settings.default_page_size), request.page)?;
        let mut builder = SelectQueryBuilder::new(dialect, &opts.table);
        builder.set_limit(size as u64 + 1);
        builder.set_offset(offset);

        for join in &opts.joins {
            builder.add_join(join)?;
        }

        let selected = opts.selected_columns();
        for (target, direction) in allowed_order_by(&selected, &opts.order_by) {
            builder.add_order_by(target, direction);
        }

        for column in &opts.group_by {
            builder.add_group_by(column)?;
        }

        for filter in transform_filters(&opts.filters, &schema)? {
            if filter.is_aggregate() {
                builder.add_having(&filter)?;
            } else {
                builder.add_where(&filter)?;
            }
        }

        let columns: Vec<InputColumn> = if selected.is_empty() {
            schema
                .all_columns()
                .into_iter()
                .map(|c| InputColumn::column(c.full))
                .collect()
        } else {
            selected
        };
        builder.set_columns(&columns)?;

        if let Some(term) = opts.search_all.as_deref() {
            let searchable: Vec<String> = columns
                .iter()
                .filter(|c| c.function.is_none() && schema.is_string_column(&c.value))
                .map(|c| c.value.clone())
                .collect();
            builder.add_search(&searchable, term);
        }

        let built = builder.build();
        let mut result = self
            .execute(dialect, &config, ExecuteQuery::new(built, QueryIntent::select()))
            .await?;

        let has_more = result.rows.len() > size;
        if has_more {
            result.rows.truncate(size);
        }

        Ok(SelectResult {
            columns: enrich_columns(result.columns, &columns, &schema),
            rows: result.rows,
            all_columns: schema.all_columns(),
            tables,
            query: result.query,
            has_more,
        })
    }

    #[tracing::instrument(skip_all, fields(datasource = %request.datasource_id, table = %request.table))]
    pub async fn run_insert(&self, request: &InsertRequest) -> Result<ExecuteResult, AppError> {
        let (datasource, config) = self.resolve(&request.datasource_id).await?;
        if !datasource.allow_insert {
            return Err(AppError::Policy(
                "This datasource does not allow insert operations".to_string(),
            ));
        }

        let mut builder = InsertQueryBuilder::new(datasource.dialect, &request.table);
        builder.set_values(request.values.clone());
        let built = builder.build()?;

        self.execute(datasource.dialect, &config, ExecuteQuery::new(built, QueryIntent::insert()))
            .await
    }

    #[tracing::instrument(skip_all, fields(datasource = %request.datasource_id, table = %request.table))]
    pub async fn run_update(&self, request: &UpdateRequest) -> Result<ExecuteResult, AppError> {
        let (datasource, config) = self.resolve(&request.datasource_id).await?;
        if !datasource.allow_update {
            return Err(AppError::Policy(
                "This datasource does not allow update operations".to_string(),
            ));
        }

        let mut builder = UpdateQueryBuilder::new(datasource.dialect, &request.table);
        builder.set_params(request.values.clone());
        for filter in &request.filters {
            builder.add_where(filter)?;
        }
        let built = builder.build()?;

        let intent = QueryIntent::update(request.allow_bulk_update);
        self.execute(datasource.dialect, &config, ExecuteQuery::new(built, intent))
            .await
    }

    /// Fetch exactly one row matching every `column = value` pair
    #[tracing::instrument(skip_all, fields(datasource = %request.datasource_id, table = %request.table))]
    pub async fn get_entity(&self, request: &EntityRequest) -> Result<EntityResult, AppError> {
        if request.props.is_empty() {
            return Err(AppError::Validation("Entity lookup needs at least one column".to_string()));
        }

        let (datasource, config) = self.resolve(&request.datasource_id).await?;
        let mut builder = SelectQueryBuilder::new(datasource.dialect, &request.table);
        builder.set_limit(2);
        for (column, value) in &request.props {
            builder.add_where(&Filter::new(
                column.clone(),
                OperatorKind::Eq,
                vec![FilterValue::literal(value.clone())],
            ))?;
        }

        let built = builder.build();
        let sql = built.sql.clone();
        let mut result = self
            .execute(datasource.dialect, &config, ExecuteQuery::new(built, QueryIntent::select()))
            .await?;

        match result.rows.len() {
            0 => Err(AppError::NotFound("Entity not found".to_string())),
            1 => Ok(EntityResult {
                entity: result.rows.remove(0),
                columns: result.columns,
                sql,
            }),
            _ => Err(AppError::Validation("Found multiple rows for given query".to_string())),
        }
    }

    /// Start a full schema inspection in the background. The datasource is
    /// `INSPECTING` until the task writes `READY` or `FAILED`. Only one
    /// inspection per datasource runs at a time.
    pub async fn inspect(&self, datasource_id: &str) -> Result<InspectionHandle, AppError> {
        let (datasource, config) = self.resolve(datasource_id).await?;
        let guard = self.inspections.claim(&datasource.id).ok_or_else(|| {
            AppError::Conflict("An inspection of this datasource is already running".to_string())
        })?;
        self.store.set_status(&datasource.id, DatasourceStatus::Inspecting).await?;
        tracing::info!("Inspection of datasource {} started", datasource.id);

        let runner = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let id = datasource.id.clone();
            let outcome: Result<usize, AppError> = async {
                let results = runner.inspect_now(datasource.dialect, &config).await?;
                runner.store.replace_inspections(&id, &results).await?;
                runner.store.mark_inspected(&id, Utc::now()).await?;
                Ok(results.len())
            }
            .await;

            let status = if outcome.is_ok() {
                DatasourceStatus::Ready
            } else {
                DatasourceStatus::Failed
            };
            if let Err(e) = runner.store.set_status(&id, status).await {
                tracing::error!("Failed to record inspection status for {}: {}", id, e);
            }

            match &outcome {
                Ok(count) => tracing::info!("Inspection of datasource {} finished: {} tables", id, count),
                Err(e) => tracing::error!("Inspection of datasource {} failed: {}", id, e),
            }
            outcome
        });

        Ok(InspectionHandle { handle })
    }

    async fn inspect_now(
        &self,
        dialect: Dialect,
        config: &DynamicConnectionConfig,
    ) -> Result<Vec<IntrospectionResult>, AppError> {
        let mut connector = self.connections.connect(dialect, config).await?;
        let results = connector.inspect_schema().await;
        if let Err(e) = connector.close().await {
            tracing::warn!("Failed to close inspection connection: {}", e);
        }
        results
    }

    /// Open, ping and close a connection with the given settings
    pub async fn check_datasource(&self, dialect: Dialect, config: DynamicConnectionConfig) -> Result<(), AppError> {
        let config = self.effective_config(config);
        let outcome = async {
            let mut connector = self.connections.connect(dialect, &config).await?;
            let checked = connector.check_connection().await;
            if let Err(e) = connector.close().await {
                tracing::warn!("Failed to close check connection: {}", e);
            }
            checked
        }
        .await;

        outcome.map_err(|e| {
            tracing::warn!("Datasource check failed: {}", e);
            AppError::Connection("Cannot connect to the database, please check datasource configuration".to_string())
        })
    }

    /// Check connectivity, store the datasource with its password encrypted and
    /// start the first inspection
    pub async fn register_datasource(&self, mut datasource: Datasource) -> Result<(Datasource, InspectionHandle), AppError> {
        let plain = datasource.password.take();
        self.check_datasource(datasource.dialect, datasource.connection_config(plain.clone()))
            .await?;

        datasource.password = plain.as_deref().map(|p| self.cipher.encrypt(p)).transpose()?;
        self.store.save_datasource(&datasource).await?;
        tracing::info!("Registered datasource {} ({})", datasource.id, datasource.dialect);

        let handle = self.inspect(&datasource.id).await?;
        Ok((datasource, handle))
    }
}

/// Page size capped at `MAX_PAGE_SIZE` (at least one row) and the row offset
/// of `page`
pub(crate) fn page_window(size: usize, page: usize) -> Result<(usize, u64), AppError> {
    let size = size.clamp(1, MAX_PAGE_SIZE);
    let offset = size
        .checked_mul(page)
        .and_then(|rows| u64::try_from(rows).ok())
        .ok_or_else(|| AppError::Validation(format!("Page {} is out of range", page)))?;
    Ok((size, offset))
}

/// Client filters to builder filters. Disabled and empty ones are skipped,
/// advanced ones go through the filter language (bare text falls back to the
/// column's default operator), the rest match the raw text with `LIKE` on
/// string columns and `=` elsewhere.
pub(crate) fn transform_filters(filters: &[ClientFilter], schema: &SchemaInfo) -> Result<Vec<Filter>, AppError> {
    let mut transformed = Vec::new();
    for client in filters {
        if !client.is_enabled || client.column.trim().is_empty() || client.value.is_empty() {
            continue;
        }

        let column_type = schema.column_type(&client.column);
        let mut filter = if client.is_advanced {
            FilterParser::parse_for_type(&client.value, column_type)
                .map_err(|e| match e {
                    AppError::Parse(reason) => AppError::Parse(format!(
                        "Invalid value for '{}': {} ({})",
                        client.column, client.value, reason
                    )),
                    other => other,
                })?
                .into_filter(client.column.clone())
        } else {
            let operator = OperatorKind::default_for_type(column_type, StringDefault::Like);
            Filter::new(
                client.column.clone(),
                operator,
                vec![FilterValue::literal(client.value.clone())],
            )
        };
        filter.id = client.id.clone();
        filter.function = client.function;
        transformed.push(filter);
    }
    Ok(transformed)
}

/// With an explicit selection only entries naming a selected alias survive;
/// function and distinct columns are ordered by their alias.
pub(crate) fn allowed_order_by(
    selected: &[InputColumn],
    order_by: &[OrderByClause],
) -> Vec<(OrderTarget, SortDirection)> {
    if selected.is_empty() {
        return order_by
            .iter()
            .map(|o| (OrderTarget::Column(o.column.clone()), o.direction))
            .collect();
    }

    order_by
        .iter()
        .filter_map(|o| match selected.iter().find(|c| c.alias() == o.column) {
            Some(c) if c.function.is_some() || c.distinct => Some((OrderTarget::Alias(o.column.clone()), o.direction)),
            Some(_) => Some((OrderTarget::Column(o.column.clone()), o.direction)),
            None => {
                tracing::debug!("Dropping ORDER BY {} outside the selection", o.column);
                None
            }
        })
        .collect()
}

/// Attach declared type and references to result columns. Function columns
/// point back at their source column instead.
pub(crate) fn enrich_columns(
    columns: Vec<ResultColumn>,
    selected: &[InputColumn],
    schema: &SchemaInfo,
) -> Vec<ResultColumn> {
    columns
        .into_iter()
        .map(|mut column| {
            if let Some(input) = selected
                .iter()
                .find(|c| c.function.is_some() && c.alias() == column.alias)
            {
                let (table, name) = input.value.split_once('.').unwrap_or(("", input.value.as_str()));
                column.column = name.to_string();
                column.table = table.to_string();
                column.full = input.value.clone();
                column.function = input.function;
                return column;
            }

            if let Some(info) = schema.lookup(&column.full) {
                column.data_type = Some(info.data_type.clone());
                column.reference = if info.is_primary {
                    Some(ColumnRef::new(column.table.clone(), column.column.clone()))
                } else {
                    info.reference.clone()
                };
                column.referenced_by = info.referenced_by.clone();
            }
            column
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnFunction, ColumnInfo, MutationValue, QueryOptions, SqlValue};
    use crate::services::connection_manager::fakes::FakeFactory;
    use crate::services::database::QueryKind;
    use crate::storage::SqliteStorage;
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: Arc<SqliteStorage>,
        factory: FakeFactory,
        runner: QueryRunner,
        datasource: Datasource,
    }

    fn column(name: &str, data_type: &str, is_primary: bool) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_primary,
            reference: None,
            referenced_by: Vec::new(),
        }
    }

    fn inspections() -> Vec<IntrospectionResult> {
        let mut users_id = column("id", "integer", true);
        users_id.referenced_by = vec![ColumnRef::new("orders", "user_id")];
        let mut user_id = column("user_id", "integer", false);
        user_id.reference = Some(ColumnRef::new("users", "id"));
        vec![
            IntrospectionResult::new(
                "users".to_string(),
                vec![users_id, column("name", "varchar", false), column("email", "text", false)],
            ),
            IntrospectionResult::new(
                "orders".to_string(),
                vec![column("id", "integer", true), user_id, column("total", "numeric", false)],
            ),
        ]
    }

    async fn harness(dialect: Dialect) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStorage::new(dir.path().join("test.db")).await.unwrap());
        let mut datasource = Datasource::new(
            "shop".to_string(),
            dialect,
            "localhost".to_string(),
            "app".to_string(),
            "shop".to_string(),
        );
        datasource.password = Some("secret".to_string());
        store.save_datasource(&datasource).await.unwrap();
        store.replace_inspections(&datasource.id, &inspections()).await.unwrap();

        let factory = FakeFactory::default();
        let runner = QueryRunner::new(
            store.clone(),
            ConnectionManager::new(Arc::new(factory.clone())),
            Arc::new(PassthroughCipher),
            RunnerSettings {
                default_page_size: 20,
                docker_mode: false,
            },
        );

        Harness {
            _dir: dir,
            store,
            factory,
            runner,
            datasource,
        }
    }

    fn select(datasource_id: &str, opts: QueryOptions, size: usize) -> SelectRequest {
        SelectRequest {
            datasource_id: datasource_id.to_string(),
            opts,
            page: 1,
            size: Some(size),
        }
    }

    #[tokio::test]
    async fn test_select_paginates_and_enriches() {
        let h = harness(Dialect::Postgres).await;
        h.factory.state.lock().unwrap().responses.push_back(Ok(ExecuteResult {
            columns: vec![
                ResultColumn::new("id", "users", "users.id"),
                ResultColumn::new("name", "users", "users.name"),
            ],
            rows: vec![vec![json!(3), json!("c")], vec![json!(4), json!("d")], vec![json!(5), json!("e")]],
            query: String::new(),
        }));

        let opts = QueryOptions {
            table: "users".to_string(),
            columns: vec![InputColumn::column("users.id"), InputColumn::column("users.name")],
            ..Default::default()
        };
        let result = h.runner.run_select(&select(&h.datasource.id, opts, 2)).await.unwrap();

        assert!(result.has_more);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.tables, vec!["users"]);
        assert_eq!(result.all_columns.len(), 3);
        assert_eq!(result.columns[0].data_type.as_deref(), Some("integer"));
        assert_eq!(result.columns[0].reference, Some(ColumnRef::new("users", "id")));
        assert_eq!(result.columns[0].referenced_by, vec![ColumnRef::new("orders", "user_id")]);

        let state = h.factory.state.lock().unwrap();
        let executed = &state.executed[0];
        assert_eq!(executed.intent.kind, QueryKind::Select);
        assert!(executed.sql.ends_with("LIMIT 3 OFFSET 2"), "{}", executed.sql);
        assert_eq!((state.opened, state.closed), (1, 1));
    }

    #[tokio::test]
    async fn test_select_without_columns_uses_schema() {
        let h = harness(Dialect::MySql).await;
        let opts = QueryOptions {
            table: "users".to_string(),
            search_all: Some("Ann".to_string()),
            ..Default::default()
        };
        let result = h.runner.run_select(&select(&h.datasource.id, opts, 20)).await.unwrap();
        assert!(!result.has_more);

        let state = h.factory.state.lock().unwrap();
        let executed = &state.executed[0];
        assert!(executed.sql.starts_with(
            "SELECT `users`.`id` AS `users.id`, `users`.`name` AS `users.name`, `users`.`email` AS `users.email`"
        ));
        assert!(executed
            .sql
            .contains("WHERE (LOWER(`users`.`name`) LIKE ? OR LOWER(`users`.`email`) LIKE ?)"));
        assert_eq!(executed.params, vec![SqlValue::from("%ann%"), SqlValue::from("%ann%")]);
    }

    #[tokio::test]
    async fn test_aggregate_filters_go_to_having() {
        let h = harness(Dialect::Postgres).await;
        let opts = QueryOptions {
            table: "orders".to_string(),
            group_by: vec![InputColumn::column("orders.user_id")],
            aggregations: vec![InputColumn::function(ColumnFunction::Sum, "orders.total")],
            filters: vec![
                ClientFilter {
                    id: "f1".to_string(),
                    column: "orders.total".to_string(),
                    value: "> 100".to_string(),
                    is_enabled: true,
                    is_advanced: true,
                    function: Some(ColumnFunction::Sum),
                },
                ClientFilter {
                    id: "f2".to_string(),
                    column: "orders.user_id".to_string(),
                    value: "7".to_string(),
                    is_enabled: true,
                    is_advanced: false,
                    function: None,
                },
                ClientFilter {
                    id: "f3".to_string(),
                    column: "orders.id".to_string(),
                    value: "1".to_string(),
                    is_enabled: false,
                    is_advanced: false,
                    function: None,
                },
            ],
            order_by: vec![
                OrderByClause {
                    column: "SUM orders.total".to_string(),
                    direction: SortDirection::Desc,
                },
                OrderByClause {
                    column: "orders.id".to_string(),
                    direction: SortDirection::Asc,
                },
            ],
            ..Default::default()
        };
        h.runner.run_select(&select(&h.datasource.id, opts, 20)).await.unwrap();

        let state = h.factory.state.lock().unwrap();
        let executed = &state.executed[0];
        assert!(executed.sql.contains("WHERE \"orders\".\"user_id\" = $1"), "{}", executed.sql);
        assert!(executed.sql.contains("GROUP BY \"orders\".\"user_id\""));
        assert!(executed.sql.contains("HAVING COALESCE(SUM(\"orders\".\"total\"), 0) > $2"));
        assert!(executed.sql.contains("ORDER BY \"SUM orders.total\" DESC LIMIT"));
        assert!(!executed.sql.contains("\"orders\".\"id\" ASC"));
        assert_eq!(executed.params, vec![SqlValue::from("7"), SqlValue::Int(100)]);
    }

    fn advanced(column: &str, value: &str) -> ClientFilter {
        ClientFilter {
            id: String::new(),
            column: column.to_string(),
            value: value.to_string(),
            is_enabled: true,
            is_advanced: true,
            function: None,
        }
    }

    #[test]
    fn test_advanced_bare_text_uses_column_default() {
        let schema = SchemaInfo::new(inspections());
        let filters = transform_filters(
            &[advanced("users.name", "ann"), advanced("users.id", "42")],
            &schema,
        )
        .unwrap();
        assert_eq!(filters[0].operator, OperatorKind::Contains);
        assert_eq!(filters[1].operator, OperatorKind::Eq);
        assert_eq!(filters[1].value, vec![FilterValue::literal(42i64)]);
    }

    #[tokio::test]
    async fn test_invalid_advanced_filter_is_parse_error() {
        let h = harness(Dialect::MySql).await;
        let opts = QueryOptions {
            table: "users".to_string(),
            filters: vec![advanced("users.name", "IN ('a)")],
            ..Default::default()
        };
        let err = h.runner.run_select(&select(&h.datasource.id, opts, 20)).await.unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
        assert_eq!(h.factory.state.lock().unwrap().opened, 0);
    }

    #[tokio::test]
    async fn test_function_columns_point_at_source() {
        let selected = vec![InputColumn::function(ColumnFunction::Count, "orders.id")];
        let schema = SchemaInfo::new(inspections());
        let columns = enrich_columns(
            vec![ResultColumn::new("COUNT orders.id", "", "COUNT orders.id")],
            &selected,
            &schema,
        );
        assert_eq!(columns[0].full, "orders.id");
        assert_eq!(columns[0].table, "orders");
        assert_eq!(columns[0].function, Some(ColumnFunction::Count));
        assert!(columns[0].data_type.is_none());
    }

    #[tokio::test]
    async fn test_insert_requires_permission() {
        let h = harness(Dialect::MySql).await;
        let request = InsertRequest {
            datasource_id: h.datasource.id.clone(),
            table: "users".to_string(),
            values: vec![MutationValue {
                column: "name".to_string(),
                value: SqlValue::from("Ann"),
            }],
        };
        let err = tokio_test::assert_err!(h.runner.run_insert(&request).await);
        assert!(matches!(err, AppError::Policy(_)));
        assert_eq!(h.factory.state.lock().unwrap().opened, 0);

        let mut datasource = h.datasource.clone();
        datasource.allow_insert = true;
        h.store.save_datasource(&datasource).await.unwrap();
        let result = tokio_test::assert_ok!(h.runner.run_insert(&request).await);
        assert_eq!(result.affected_rows(), Some(1));
        assert_eq!(h.factory.state.lock().unwrap().executed[0].intent, QueryIntent::insert());
    }

    #[tokio::test]
    async fn test_update_passes_bulk_permission() {
        let h = harness(Dialect::Postgres).await;
        let mut datasource = h.datasource.clone();
        datasource.allow_update = true;
        h.store.save_datasource(&datasource).await.unwrap();

        let request = UpdateRequest {
            datasource_id: datasource.id.clone(),
            table: "users".to_string(),
            values: vec![MutationValue {
                column: "name".to_string(),
                value: SqlValue::from("Bob"),
            }],
            filters: vec![Filter::new("users.id", OperatorKind::Gt, vec![FilterValue::literal(1i64)])],
            allow_bulk_update: true,
        };
        h.runner.run_update(&request).await.unwrap();

        let state = h.factory.state.lock().unwrap();
        assert_eq!(state.executed[0].intent, QueryIntent::update(true));
        assert_eq!(
            state.executed[0].sql,
            "UPDATE \"users\" SET \"name\" = $1 WHERE \"users\".\"id\" > $2"
        );
    }

    #[tokio::test]
    async fn test_get_entity_expects_one_row() {
        let h = harness(Dialect::MySql).await;
        let request = EntityRequest {
            datasource_id: h.datasource.id.clone(),
            table: "users".to_string(),
            props: [("id".to_string(), SqlValue::Int(1))].into_iter().collect(),
        };

        let err = h.runner.get_entity(&request).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        h.factory.state.lock().unwrap().responses.push_back(Ok(ExecuteResult {
            columns: vec![ResultColumn::new("id", "users", "id")],
            rows: vec![vec![json!(1)], vec![json!(1)]],
            query: String::new(),
        }));
        let err = h.runner.get_entity(&request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        h.factory.state.lock().unwrap().responses.push_back(Ok(ExecuteResult {
            columns: vec![ResultColumn::new("id", "users", "id")],
            rows: vec![vec![json!(1)]],
            query: String::new(),
        }));
        let entity = h.runner.get_entity(&request).await.unwrap();
        assert_eq!(entity.entity, vec![json!(1)]);
        assert_eq!(entity.sql, "SELECT * FROM `users` WHERE `id` = ? LIMIT 2");
    }

    #[tokio::test]
    async fn test_huge_page_is_rejected() {
        let h = harness(Dialect::Postgres).await;
        let opts = QueryOptions {
            table: "users".to_string(),
            ..Default::default()
        };
        let mut request = select(&h.datasource.id, opts, 20);
        request.page = usize::MAX / 2;

        let err = h.runner.run_select(&request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.factory.state.lock().unwrap().opened, 0);
    }

    #[tokio::test]
    async fn test_page_size_is_capped() {
        let h = harness(Dialect::MySql).await;
        let opts = QueryOptions {
            table: "users".to_string(),
            ..Default::default()
        };
        let mut request = select(&h.datasource.id, opts, MAX_PAGE_SIZE * 10);
        request.page = 2;
        h.runner.run_select(&request).await.unwrap();

        let state = h.factory.state.lock().unwrap();
        let expected = format!("LIMIT {} OFFSET {}", MAX_PAGE_SIZE + 1, MAX_PAGE_SIZE * 2);
        assert!(state.executed[0].sql.ends_with(&expected), "{}", state.executed[0].sql);
    }

    #[test]
    fn test_page_window() {
        assert_eq!(page_window(20, 3).unwrap(), (20, 60));
        assert_eq!(page_window(0, 3).unwrap(), (1, 3));
        assert!(matches!(page_window(20, usize::MAX), Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_concurrent_inspection_is_rejected() {
        let h = harness(Dialect::Postgres).await;
        let gate = Arc::new(tokio::sync::Notify::new());
        h.factory.state.lock().unwrap().inspection_gate = Some(gate.clone());

        let first = h.runner.inspect(&h.datasource.id).await.unwrap();
        let err = h.runner.inspect(&h.datasource.id).await.err();
        assert!(matches!(err, Some(AppError::Conflict(_))));

        gate.notify_one();
        first.wait().await.unwrap();
        let datasource = h.store.get_datasource(&h.datasource.id).await.unwrap().unwrap();
        assert_eq!(datasource.status, DatasourceStatus::Ready);

        // Finished runs release the datasource
        gate.notify_one();
        let again = h.runner.inspect(&h.datasource.id).await.unwrap();
        again.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_datasource() {
        let h = harness(Dialect::MySql).await;
        let request = select("nope", QueryOptions {
            table: "users".to_string(),
            ..Default::default()
        }, 20);
        assert!(matches!(h.runner.run_select(&request).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_inspection_stores_snapshot_and_status() {
        let h = harness(Dialect::Postgres).await;
        h.factory.state.lock().unwrap().inspection = vec![IntrospectionResult::new(
            "products".to_string(),
            vec![column("sku", "text", true)],
        )];

        let handle = h.runner.inspect(&h.datasource.id).await.unwrap();
        assert_eq!(handle.wait().await.unwrap(), 1);

        let datasource = h.store.get_datasource(&h.datasource.id).await.unwrap().unwrap();
        assert_eq!(datasource.status, DatasourceStatus::Ready);
        assert!(datasource.last_inspected.is_some());
        let stored = h
            .store
            .get_inspections(&h.datasource.id, &["products".to_string(), "users".to_string()])
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);

        let state = h.factory.state.lock().unwrap();
        assert_eq!(state.opened, state.closed);
    }

    #[tokio::test]
    async fn test_failed_inspection_marks_failed() {
        let h = harness(Dialect::MySql).await;
        h.factory.state.lock().unwrap().fail_connect = true;

        let handle = h.runner.inspect(&h.datasource.id).await.unwrap();
        assert!(handle.wait().await.is_err());

        let datasource = h.store.get_datasource(&h.datasource.id).await.unwrap().unwrap();
        assert_eq!(datasource.status, DatasourceStatus::Failed);
        // Previous snapshot is kept
        let stored = h.store.get_inspections(&h.datasource.id, &["users".to_string()]).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_check_datasource_hides_driver_error() {
        let h = harness(Dialect::MySql).await;
        h.factory.state.lock().unwrap().fail_check = true;

        let config = h.datasource.connection_config(Some("secret".to_string()));
        let err = h.runner.check_datasource(Dialect::MySql, config).await.unwrap_err();
        match err {
            AppError::Connection(message) => {
                assert_eq!(message, "Cannot connect to the database, please check datasource configuration")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let state = h.factory.state.lock().unwrap();
        assert_eq!(state.closed, 1);
    }

    #[tokio::test]
    async fn test_register_encrypts_and_inspects() {
        struct ReversingCipher;
        impl CredentialCipher for ReversingCipher {
            fn encrypt(&self, plain: &str) -> Result<String, AppError> {
                Ok(plain.chars().rev().collect())
            }
            fn decrypt(&self, stored: &str) -> Result<String, AppError> {
                Ok(stored.chars().rev().collect())
            }
        }

        let h = harness(Dialect::Postgres).await;
        let runner = QueryRunner::new(
            h.store.clone(),
            ConnectionManager::new(Arc::new(h.factory.clone())),
            Arc::new(ReversingCipher),
            RunnerSettings {
                default_page_size: 20,
                docker_mode: false,
            },
        );

        let mut datasource = Datasource::new(
            "crm".to_string(),
            Dialect::Postgres,
            "db.internal".to_string(),
            "app".to_string(),
            "crm".to_string(),
        );
        datasource.password = Some("abc".to_string());
        let (saved, handle) = runner.register_datasource(datasource).await.unwrap();
        handle.wait().await.unwrap();

        let stored = h.store.get_datasource(&saved.id).await.unwrap().unwrap();
        assert_eq!(stored.password.as_deref(), Some("cba"));
        assert_eq!(stored.status, DatasourceStatus::Ready);
    }
}
