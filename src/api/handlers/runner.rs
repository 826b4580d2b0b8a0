use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::collections::{BTreeMap, HashMap};

use crate::api::middleware::AppError;
use crate::api::routes::AppState;
use crate::models::{
    EntityRequest, EntityResult, ExecuteResult, InsertRequest, SelectRequest, SelectResult, SqlValue, UpdateRequest,
};

/// Run a paginated SELECT. The path id wins over any id in the body.
pub async fn select(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut request): Json<SelectRequest>,
) -> Result<Json<SelectResult>, AppError> {
    request.datasource_id = id;
    let result = state.runner.run_select(&request).await?;
    Ok(Json(result))
}

pub async fn insert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut request): Json<InsertRequest>,
) -> Result<Json<ExecuteResult>, AppError> {
    request.datasource_id = id;
    let result = state.runner.run_insert(&request).await?;
    Ok(Json(result))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut request): Json<UpdateRequest>,
) -> Result<Json<ExecuteResult>, AppError> {
    request.datasource_id = id;
    let result = state.runner.run_update(&request).await?;
    Ok(Json(result))
}

/// Query parameters are the `column = value` pairs of the lookup
pub async fn entity(
    State(state): State<AppState>,
    Path((id, table)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<EntityResult>, AppError> {
    let props: BTreeMap<String, SqlValue> = params
        .into_iter()
        .map(|(column, value)| (column, SqlValue::Text(value)))
        .collect();

    let request = EntityRequest {
        datasource_id: id,
        table,
        props,
    };
    let result = state.runner.get_entity(&request).await?;
    Ok(Json(result))
}
