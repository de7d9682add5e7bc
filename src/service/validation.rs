//! Record payload validation: keys against the definition, values coerced per field type.

use crate::error::CollectionError;
use crate::schema::{CollectionDefinition, FieldDefinition, FieldType, RelationKind, STRING_MAX_CHARS};
use crate::sql::{ColumnValue, FieldValue};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Record write payload: scalar values plus, per relation field, the target documentIds.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordInput {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<Uuid>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

pub struct RecordValidator;

impl RecordValidator {
    /// Coerce `data` into column assignments in definition order.
    /// Create requires every required scalar field; both modes refuse null for required fields.
    pub fn coerce<'a>(
        def: &'a CollectionDefinition,
        data: &Map<String, Value>,
        mode: WriteMode,
    ) -> Result<Vec<ColumnValue<'a>>, CollectionError> {
        for key in data.keys() {
            match def.field(key) {
                Some(f) if f.is_relation() => {
                    return Err(CollectionError::field_validation(
                        key,
                        format!("relation field \"{}\" must be set through relations", key),
                    ))
                }
                Some(_) => {}
                None => {
                    return Err(CollectionError::field_validation(
                        key,
                        format!("unknown field \"{}\" in collection \"{}\"", key, def.slug),
                    ))
                }
            }
        }
        let mut out = Vec::new();
        for field in def.scalar_fields() {
            let Some(kind) = field.field_type.column_kind() else { continue };
            let Some(raw) = data.get(&field.name) else {
                if mode == WriteMode::Create && field.required {
                    return Err(required(field));
                }
                continue;
            };
            let value = FieldValue::from_json(kind, &field.name, raw)?;
            if value.is_null() && field.required {
                return Err(required(field));
            }
            check_length(field, &value)?;
            out.push((field.name.as_str(), kind, value));
        }
        Ok(out)
    }

    /// Resolve relation keys to their fields; targets are deduplicated keeping first occurrence.
    pub fn relations<'a>(
        def: &'a CollectionDefinition,
        relations: &BTreeMap<String, Vec<Uuid>>,
    ) -> Result<Vec<(&'a FieldDefinition, Vec<Uuid>)>, CollectionError> {
        let mut out = Vec::with_capacity(relations.len());
        for (name, targets) in relations {
            let (field, rel) = def
                .relation_fields()
                .find(|(f, _)| f.name == *name)
                .ok_or_else(|| {
                    CollectionError::field_validation(
                        name,
                        format!("\"{}\" is not a relation field of collection \"{}\"", name, def.slug),
                    )
                })?;
            let mut seen = HashSet::new();
            let targets: Vec<Uuid> = targets.iter().copied().filter(|t| seen.insert(*t)).collect();
            if rel.kind == RelationKind::OneToOne && targets.len() > 1 {
                return Err(CollectionError::field_validation(
                    name,
                    format!("oneToOne relation \"{}\" accepts at most one target", name),
                ));
            }
            out.push((field, targets));
        }
        Ok(out)
    }
}

fn required(field: &FieldDefinition) -> CollectionError {
    CollectionError::field_validation(&field.name, format!("field \"{}\" is required", field.name))
}

fn check_length(field: &FieldDefinition, value: &FieldValue) -> Result<(), CollectionError> {
    if let (FieldType::String, FieldValue::String(s)) = (field.field_type, value) {
        if s.chars().count() > STRING_MAX_CHARS {
            return Err(CollectionError::field_validation(
                &field.name,
                format!("field \"{}\" must be at most {} characters", field.name, STRING_MAX_CHARS),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnKind;
    use chrono::Utc;
    use serde_json::json;

    fn posts() -> CollectionDefinition {
        CollectionDefinition {
            id: 1,
            document_id: Uuid::nil(),
            name: "Posts".into(),
            slug: "posts".into(),
            description: None,
            parent_id: None,
            fields: serde_json::from_value(json!([
                { "name": "title", "type": "string", "required": true },
                { "name": "views", "type": "integer" },
                { "name": "publishedAt", "type": "date" },
                { "name": "author", "type": "relation", "relation": { "type": "oneToOne", "target": "authors" } },
                { "name": "tags", "type": "relation", "relation": { "type": "manyToMany", "target": "tags" } }
            ]))
            .unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn data(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn create_coerces_in_definition_order() {
        let def = posts();
        let cols = RecordValidator::coerce(
            &def,
            &data(json!({ "views": 3, "title": "Hi", "publishedAt": "2024-01-02" })),
            WriteMode::Create,
        )
        .unwrap();
        let names: Vec<&str> = cols.iter().map(|(n, _, _)| *n).collect();
        assert_eq!(names, ["title", "views", "publishedAt"]);
        assert_eq!(cols[1].1, ColumnKind::BigInt);
        assert!(matches!(cols[2].2, FieldValue::Date(_)));
    }

    #[test]
    fn create_requires_required_fields() {
        let def = posts();
        let err = RecordValidator::coerce(&def, &data(json!({ "views": 1 })), WriteMode::Create).unwrap_err();
        assert!(err.to_string().contains("title"));
        assert!(RecordValidator::coerce(&def, &data(json!({ "views": 1 })), WriteMode::Update).is_ok());
        assert!(RecordValidator::coerce(&def, &data(json!({ "title": null })), WriteMode::Update).is_err());
    }

    #[test]
    fn unknown_and_relation_keys_rejected_in_data() {
        let def = posts();
        assert!(RecordValidator::coerce(&def, &data(json!({ "title": "a", "extra": 1 })), WriteMode::Create).is_err());
        assert!(RecordValidator::coerce(&def, &data(json!({ "title": "a", "tags": [] })), WriteMode::Create).is_err());
    }

    #[test]
    fn string_length_is_bounded() {
        let def = posts();
        let long = "x".repeat(STRING_MAX_CHARS + 1);
        assert!(RecordValidator::coerce(&def, &data(json!({ "title": long })), WriteMode::Create).is_err());
    }

    #[test]
    fn relation_targets_deduplicated_and_one_to_one_capped() {
        let def = posts();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let rels = RecordValidator::relations(&def, &BTreeMap::from([("tags".to_string(), vec![a, b, a])])).unwrap();
        assert_eq!(rels[0].1, vec![a, b]);

        assert!(RecordValidator::relations(&def, &BTreeMap::from([("author".to_string(), vec![a, b])])).is_err());
        assert!(RecordValidator::relations(&def, &BTreeMap::from([("author".to_string(), vec![a, a])])).is_ok());
        assert!(RecordValidator::relations(&def, &BTreeMap::from([("title".to_string(), vec![a])])).is_err());
    }

    #[test]
    fn input_deserializes_with_defaults() {
        let input: RecordInput = serde_json::from_value(json!({ "data": { "title": "x" } })).unwrap();
        assert!(input.relations.is_empty());
        assert_eq!(input.data["title"], "x");
    }
}
