//! A row of a collection table, decoded by field kind, with optional related items.

use crate::error::{CollectionError, OperationContext};
use crate::schema::{CollectionDefinition, ColumnKind};
use crate::sql::FieldValue;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

/// One related item: the target's documentId and its full row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntry {
    pub id: Uuid,
    pub data: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub id: i64,
    pub document_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Scalar field values in definition order.
    pub values: Vec<(String, FieldValue)>,
    /// Present only when relations were requested.
    pub relations: Vec<(String, Vec<RelatedEntry>)>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.iter().find(|(n, _)| n == field).map(|(_, v)| v)
    }

    pub fn relation(&self, field: &str) -> Option<&[RelatedEntry]> {
        self.relations
            .iter()
            .find(|(n, _)| n == field)
            .map(|(_, v)| v.as_slice())
    }

    pub(crate) fn from_row(
        def: &CollectionDefinition,
        row: &PgRow,
        include_relations: bool,
    ) -> Result<Record, CollectionError> {
        let mut values = Vec::new();
        for field in def.scalar_fields() {
            let Some(kind) = field.field_type.column_kind() else { continue };
            let value = decode(row, &field.name, kind).during("decode record")?;
            values.push((field.name.clone(), value));
        }
        let mut relations = Vec::new();
        if include_relations {
            for (field, _) in def.relation_fields() {
                let raw: Option<serde_json::Value> = row.try_get(field.name.as_str()).during("decode relations")?;
                let entries: Vec<RelatedEntry> = match raw {
                    Some(v) => serde_json::from_value(v).map_err(|e| {
                        CollectionError::field_validation(
                            &field.name,
                            format!("related items of \"{}\" could not be read: {}", field.name, e),
                        )
                    })?,
                    None => Vec::new(),
                };
                relations.push((field.name.clone(), entries));
            }
        }
        Ok(Record {
            id: row.try_get("id").during("decode record")?,
            document_id: row.try_get("documentId").during("decode record")?,
            created_at: row.try_get("createdAt").during("decode record")?,
            updated_at: row.try_get("updatedAt").during("decode record")?,
            values,
            relations,
        })
    }
}

fn decode(row: &PgRow, name: &str, kind: ColumnKind) -> Result<FieldValue, sqlx::Error> {
    let value = match kind {
        ColumnKind::Text => row.try_get::<Option<String>, _>(name)?.map(FieldValue::String),
        ColumnKind::Boolean => row.try_get::<Option<bool>, _>(name)?.map(FieldValue::Boolean),
        ColumnKind::Double => row.try_get::<Option<f64>, _>(name)?.map(FieldValue::Number),
        ColumnKind::BigInt => row.try_get::<Option<i64>, _>(name)?.map(FieldValue::Integer),
        ColumnKind::Timestamp => row
            .try_get::<Option<DateTime<Utc>>, _>(name)?
            .map(FieldValue::Date),
        ColumnKind::Uuid => row.try_get::<Option<Uuid>, _>(name)?.map(FieldValue::Uuid),
    };
    Ok(value.unwrap_or(FieldValue::Null))
}

/// Flat object: base columns, then fields, then relation arrays.
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4 + self.values.len() + self.relations.len()))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("documentId", &self.document_id)?;
        map.serialize_entry("createdAt", &self.created_at)?;
        map.serialize_entry("updatedAt", &self.updated_at)?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        for (name, entries) in &self.relations {
            map.serialize_entry(name, entries)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_flat() {
        let doc = Uuid::new_v4();
        let target = Uuid::new_v4();
        let record = Record {
            id: 3,
            document_id: doc,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            values: vec![
                ("title".into(), FieldValue::String("Hello".into())),
                ("views".into(), FieldValue::Null),
            ],
            relations: vec![(
                "category".into(),
                vec![RelatedEntry { id: target, data: json!({ "title": "Tech" }) }],
            )],
        };
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["id"], 3);
        assert_eq!(v["documentId"], doc.to_string());
        assert_eq!(v["title"], "Hello");
        assert_eq!(v["views"], json!(null));
        assert_eq!(v["category"][0]["id"], target.to_string());
        assert_eq!(v["category"][0]["data"]["title"], "Tech");
        assert_eq!(record.get("title"), Some(&FieldValue::String("Hello".into())));
        assert_eq!(record.relation("category").map(<[RelatedEntry]>::len), Some(1));
    }

    #[test]
    fn related_entry_reads_aggregated_json() {
        let id = Uuid::new_v4();
        let entries: Vec<RelatedEntry> =
            serde_json::from_value(json!([{ "id": id.to_string(), "data": { "id": 1 } }])).unwrap();
        assert_eq!(entries[0].id, id);
    }
}
