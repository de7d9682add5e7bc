//! Record handlers under `/content/:slug`. Hierarchical slugs arrive percent-encoded.

use super::{parse_body, parse_document_id};
use crate::error::AppError;
use crate::query::{parse_flag, QueryOptions};
use crate::response::{success_many, success_one, success_one_ok, success_page};
use crate::service::RecordInput;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

pub async fn list(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let options = QueryOptions::from_params(&params)?;
    let result = state.service.list_records(&slug, &options).await?;
    Ok(success_page(result.data, result.meta))
}

pub async fn create(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let input: RecordInput = parse_body(body)?;
    let record = state.service.create_record(&slug, &input).await?;
    Ok(success_one(record))
}

pub async fn read(
    State(state): State<AppState>,
    Path((slug, id_str)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let document_id = parse_document_id(&id_str)?;
    let include = parse_flag(&params, "includeRelations")?;
    let record = state.service.get_record(&slug, document_id, include).await?;
    Ok(success_one_ok(record))
}

pub async fn update(
    State(state): State<AppState>,
    Path((slug, id_str)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let document_id = parse_document_id(&id_str)?;
    let input: RecordInput = parse_body(body)?;
    let record = state.service.update_record(&slug, document_id, &input).await?;
    Ok(success_one_ok(record))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((slug, id_str)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let document_id = parse_document_id(&id_str)?;
    state.service.delete_record(&slug, document_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn relations(
    State(state): State<AppState>,
    Path((slug, id_str, field)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let document_id = parse_document_id(&id_str)?;
    let ids = state.service.related_ids(&slug, document_id, &field).await?;
    Ok(success_many(ids))
}
