//! Collection definition handlers: CRUD by documentId, hierarchy, subcollections, move.

use super::{parse_body, parse_document_id};
use crate::error::{AppError, CollectionError};
use crate::response::{success_many, success_one, success_one_ok};
use crate::schema::{CollectionDefinition, CollectionPatch, NewCollection};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveBody {
    #[serde(default)]
    pub parent_id: Option<i64>,
}

async fn require(state: &AppState, id_str: &str) -> Result<CollectionDefinition, AppError> {
    let document_id = parse_document_id(id_str)?;
    state
        .service
        .find_by_document_id(document_id)
        .await?
        .ok_or_else(|| CollectionError::CollectionNotFound(id_str.to_string()).into())
}

pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let all = state.service.find_all().await?;
    Ok(success_many(all))
}

pub async fn create(State(state): State<AppState>, Json(body): Json<Value>) -> Result<impl IntoResponse, AppError> {
    let input: NewCollection = parse_body(body)?;
    let created = state.service.create(input).await?;
    Ok(success_one(created))
}

pub async fn hierarchy(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let tree = state.service.get_collection_hierarchy().await?;
    Ok(success_many(tree))
}

pub async fn read(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let def = require(&state, &id_str).await?;
    Ok(success_one_ok(def))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let patch: CollectionPatch = parse_body(body)?;
    let def = require(&state, &id_str).await?;
    let updated = state.service.update(def.id, patch).await?;
    Ok(success_one_ok(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let def = require(&state, &id_str).await?;
    state.service.delete(def.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn subcollections(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let def = require(&state, &id_str).await?;
    let children = state.service.get_subcollections(def.id).await?;
    Ok(success_many(children))
}

pub async fn move_collection(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let body: MoveBody = parse_body(body)?;
    let def = require(&state, &id_str).await?;
    let moved = state.service.move_collection(def.id, body.parent_id).await?;
    Ok(success_one_ok(moved))
}
