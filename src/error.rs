//! Typed errors, storage-error classification, and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use serde::Serialize;
use sqlx::postgres::PgDatabaseError;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Error taxonomy of the collections core. Every public operation returns one of these.
#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("collection \"{0}\" not found")]
    CollectionNotFound(String),
    #[error("collection with slug \"{0}\" already exists")]
    CollectionAlreadyExists(String),
    #[error("{message}")]
    FieldValidation {
        message: String,
        field: Option<String>,
    },
    #[error("value for field \"{field}\" already exists")]
    DuplicateFieldValue { field: String, value: String },
    #[error("record \"{document_id}\" not found in collection \"{collection}\"")]
    RecordNotFound {
        document_id: String,
        collection: String,
    },
    #[error("moving collection {id} under {parent_id} would create a circular reference")]
    HierarchyCycle { id: i64, parent_id: i64 },
    #[error("collection operation failed: {operation}: {source}")]
    OperationFailed {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl CollectionError {
    pub fn validation(message: impl Into<String>) -> Self {
        CollectionError::FieldValidation {
            message: message.into(),
            field: None,
        }
    }

    pub fn field_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CollectionError::FieldValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn record_not_found(document_id: impl ToString, collection: &str) -> Self {
        CollectionError::RecordNotFound {
            document_id: document_id.to_string(),
            collection: collection.to_string(),
        }
    }

    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            CollectionError::CollectionNotFound(_) => "collection_not_found",
            CollectionError::CollectionAlreadyExists(_) => "collection_exists",
            CollectionError::FieldValidation { .. } => "field_validation",
            CollectionError::DuplicateFieldValue { .. } => "duplicate_field_value",
            CollectionError::RecordNotFound { .. } => "record_not_found",
            CollectionError::HierarchyCycle { .. } => "hierarchy_cycle",
            CollectionError::OperationFailed { .. } => "operation_failed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            CollectionError::CollectionNotFound(_) | CollectionError::RecordNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            CollectionError::CollectionAlreadyExists(_)
            | CollectionError::DuplicateFieldValue { .. }
            | CollectionError::HierarchyCycle { .. } => StatusCode::CONFLICT,
            CollectionError::FieldValidation { .. } => StatusCode::BAD_REQUEST,
            CollectionError::OperationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            CollectionError::FieldValidation { field: Some(f), .. } => {
                Some(serde_json::json!({ "field": f }))
            }
            CollectionError::DuplicateFieldValue { field, value } => {
                Some(serde_json::json!({ "field": field, "value": value }))
            }
            CollectionError::RecordNotFound {
                document_id,
                collection,
            } => Some(serde_json::json!({ "documentId": document_id, "collection": collection })),
            CollectionError::OperationFailed { operation, source } => {
                Some(serde_json::json!({ "operation": operation, "originalError": source.to_string() }))
            }
            _ => None,
        }
    }
}

/// Attaches an operation name to storage results and sorts constraint violations into the taxonomy.
pub trait OperationContext<T> {
    fn during(self, operation: &'static str) -> Result<T, CollectionError>;
}

impl<T> OperationContext<T> for Result<T, sqlx::Error> {
    fn during(self, operation: &'static str) -> Result<T, CollectionError> {
        self.map_err(|e| classify(operation, e))
    }
}

fn classify(operation: &'static str, err: sqlx::Error) -> CollectionError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let detail = db
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(|pg| pg.detail())
                .and_then(parse_key_detail);
            let (field, value) = detail.unwrap_or_else(|| {
                (db.constraint().unwrap_or("unknown").to_string(), String::new())
            });
            return CollectionError::DuplicateFieldValue { field, value };
        }
        if db.is_foreign_key_violation() {
            return CollectionError::validation(format!(
                "referenced record does not exist: {}",
                db.message()
            ));
        }
        if db.code().as_deref() == Some("23502") {
            let column = db
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(|pg| pg.column())
                .map(String::from);
            return CollectionError::FieldValidation {
                message: db.message().to_string(),
                field: column,
            };
        }
    }
    CollectionError::OperationFailed {
        operation,
        source: err,
    }
}

/// Parse PostgreSQL's `Key (col)=(value) already exists.` detail into (column, value).
fn parse_key_detail(detail: &str) -> Option<(String, String)> {
    static KEY_DETAIL: OnceLock<Regex> = OnceLock::new();
    let re = KEY_DETAIL.get_or_init(|| {
        Regex::new(r"^Key \((?P<cols>[^)]*)\)=\((?P<vals>.*)\) already exists\.?$")
            .expect("key detail pattern is valid")
    });
    let caps = re.captures(detail)?;
    let field = caps["cols"].trim_matches('"').to_string();
    Some((field, caps["vals"].to_string()))
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, Option<serde_json::Value>) {
        match self {
            AppError::Collection(e) => (e.status(), e.code(), e.details()),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", None),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, details) = self.parts();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
