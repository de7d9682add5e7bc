//! HTTP handlers for collection definitions and their records.

pub mod collections;
pub mod records;

use crate::error::AppError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

fn parse_document_id(id_str: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id_str).map_err(|_| AppError::BadRequest(format!("invalid documentId \"{}\"", id_str)))
}

fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, AppError> {
    if !body.is_object() {
        return Err(AppError::BadRequest("body must be a JSON object".into()));
    }
    serde_json::from_value(body).map_err(|e| AppError::BadRequest(format!("invalid body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::NewCollection;
    use serde_json::json;

    #[test]
    fn document_id_must_be_a_uuid() {
        assert!(parse_document_id("not-a-uuid").is_err());
        assert!(parse_document_id("6f1c1f7e-3d1b-4b7c-9a53-0d2f4a8b9e10").is_ok());
    }

    #[test]
    fn body_must_be_an_object_of_the_right_shape() {
        assert!(parse_body::<NewCollection>(json!([1, 2])).is_err());
        assert!(parse_body::<NewCollection>(json!({ "fields": "nope" })).is_err());
        let parsed: NewCollection = parse_body(json!({ "name": "Posts", "slug": "posts" })).unwrap();
        assert_eq!(parsed.slug, "posts");
    }
}
