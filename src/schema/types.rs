//! Collection definition types, serialized exactly as they are stored in the registry's `fields` JSONB.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Longtext,
    Boolean,
    Number,
    Integer,
    Date,
    Relation,
}

/// Storage kind of a physical column; drives DDL, parameter casts, and row decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Boolean,
    Double,
    BigInt,
    Timestamp,
    Uuid,
}

impl ColumnKind {
    /// PostgreSQL type name used for `$n::<cast>` placeholders.
    pub fn cast(self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Double => "double precision",
            ColumnKind::BigInt => "bigint",
            ColumnKind::Timestamp => "timestamptz",
            ColumnKind::Uuid => "uuid",
        }
    }
}

impl FieldType {
    /// None for relation fields: they have no column.
    pub fn column_kind(self) -> Option<ColumnKind> {
        match self {
            FieldType::String | FieldType::Longtext => Some(ColumnKind::Text),
            FieldType::Boolean => Some(ColumnKind::Boolean),
            FieldType::Number => Some(ColumnKind::Double),
            FieldType::Integer => Some(ColumnKind::BigInt),
            FieldType::Date => Some(ColumnKind::Timestamp),
            FieldType::Relation => None,
        }
    }

    pub fn ddl_type(self) -> Option<&'static str> {
        match self {
            FieldType::String => Some("VARCHAR(255)"),
            FieldType::Longtext => Some("TEXT"),
            FieldType::Boolean => Some("BOOLEAN"),
            FieldType::Number => Some("DOUBLE PRECISION"),
            FieldType::Integer => Some("BIGINT"),
            FieldType::Date => Some("TIMESTAMPTZ"),
            FieldType::Relation => None,
        }
    }
}

/// Maximum length of a `string` field (its column is VARCHAR(255)).
pub const STRING_MAX_CHARS: usize = 255;

/// Columns every collection table carries, in table order.
pub const BASE_COLUMNS: [(&str, ColumnKind); 4] = [
    ("id", ColumnKind::BigInt),
    ("documentId", ColumnKind::Uuid),
    ("createdAt", ColumnKind::Timestamp),
    ("updatedAt", ColumnKind::Timestamp),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InverseSide {
    /// Field on the target collection that receives the reverse link.
    pub field: String,
    /// Field on the target collection shown when listing related items.
    pub display_field: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationConfig {
    #[serde(rename = "type")]
    pub kind: RelationKind,
    /// Slug of the target collection.
    pub target: String,
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_side: Option<InverseSide>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationConfig>,
}

impl FieldDefinition {
    pub fn is_relation(&self) -> bool {
        self.field_type == FieldType::Relation
    }

    /// True when the physical column must be recreated to reflect `other`.
    pub fn column_changed(&self, other: &FieldDefinition) -> bool {
        self.field_type != other.field_type
            || self.required != other.required
            || self.unique != other.unique
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    pub id: i64,
    pub document_id: Uuid,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
    pub fields: Vec<FieldDefinition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields backed by a column, in definition order.
    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| !f.is_relation())
    }

    /// Relation fields that carry a config. Fields missing one are rejected at validation time.
    pub fn relation_fields(&self) -> impl Iterator<Item = (&FieldDefinition, &RelationConfig)> {
        self.fields
            .iter()
            .filter(|f| f.is_relation())
            .filter_map(|f| f.relation.as_ref().map(|r| (f, r)))
    }

    /// Column kind for a base column or scalar field; None for relations and unknown names.
    pub fn column_kind(&self, name: &str) -> Option<ColumnKind> {
        BASE_COLUMNS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, k)| *k)
            .or_else(|| self.field(name).and_then(|f| f.field_type.column_kind()))
    }
}

/// Input for creating a collection. `slug` is the leaf slug; the parent's slug is prefixed on create.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCollection {
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// Partial update of a collection. Absent members are left unchanged.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<FieldDefinition>>,
}
