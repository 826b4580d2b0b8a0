use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{datasource, filters, runner};
use crate::services::QueryRunner;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub runner: QueryRunner,
}

/// Create router with application state
pub fn create_router(runner: QueryRunner) -> Router {
    let state = AppState { runner };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/datasources", post(datasource::create_datasource))
        .route("/api/datasources/{id}/inspect", post(datasource::inspect_datasource))
        .route("/api/datasources/{id}/select", post(runner::select))
        .route("/api/datasources/{id}/insert", post(runner::insert))
        .route("/api/datasources/{id}/update", post(runner::update))
        .route("/api/datasources/{id}/entity/{table}", get(runner::entity))
        .route("/api/filters/parse", post(filters::parse_filter))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
