use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::middleware::AppError;
use crate::models::Filter;
use crate::services::{FilterParser, ParsedFilter};

#[derive(Debug, Deserialize)]
pub struct ParseFilterRequest {
    pub text: String,
    /// Declared column type; decides the fallback operator for plain text
    #[serde(default)]
    pub column_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ParseFilterResponse {
    #[serde(flatten)]
    pub filter: ParsedFilter,
    pub label: &'static str,
    /// Canonical text form of the parsed filter
    pub text: String,
}

pub async fn parse_filter(Json(request): Json<ParseFilterRequest>) -> Result<Json<ParseFilterResponse>, AppError> {
    let column_type = request.column_type.as_deref();
    let parsed = FilterParser::parse_for_type(&request.text, column_type)?;

    let filter = Filter::new(String::new(), parsed.operator, parsed.value.clone());
    let text = FilterParser::stringify(&filter, column_type.unwrap_or_default());

    Ok(Json(ParseFilterResponse {
        label: parsed.operator.label(),
        filter: parsed,
        text,
    }))
}
