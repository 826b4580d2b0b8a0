use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::middleware::AppError;
use crate::api::routes::AppState;
use crate::models::{CreateDatasourceRequest, DatasourceStatus};

/// Register a datasource and kick off its first inspection
pub async fn create_datasource(
    State(state): State<AppState>,
    Json(payload): Json<CreateDatasourceRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    payload.validate()?;

    let (mut datasource, _inspection) = state.runner.register_datasource(payload.into_datasource()).await?;
    datasource.status = DatasourceStatus::Inspecting;

    Ok((StatusCode::CREATED, Json(serde_json::json!({ "datasource": datasource }))))
}

/// Start a background inspection; poll the datasource status for the outcome
pub async fn inspect_datasource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let _inspection = state.runner.inspect(&id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "datasource_id": id,
            "status": DatasourceStatus::Inspecting,
        })),
    ))
}
