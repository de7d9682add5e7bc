//! Typed field values: coerced from JSON payloads, bound as query parameters, decoded from rows.

use crate::error::CollectionError;
use crate::schema::ColumnKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;
use uuid::Uuid;

/// A value that can be bound to a PostgreSQL query.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    String(String),
    Boolean(bool),
    Number(f64),
    Integer(i64),
    Date(DateTime<Utc>),
    Uuid(Uuid),
}

impl FieldValue {
    /// Strict coercion of a JSON value into the column's kind.
    pub fn from_json(kind: ColumnKind, field: &str, v: &Value) -> Result<Self, CollectionError> {
        if v.is_null() {
            return Ok(FieldValue::Null);
        }
        let mismatch = |expected: &str| {
            CollectionError::field_validation(
                field,
                format!("field \"{}\" expects {}, got {}", field, expected, json_kind(v)),
            )
        };
        Ok(match kind {
            ColumnKind::Text => match v {
                Value::String(s) => FieldValue::String(s.clone()),
                _ => return Err(mismatch("a string")),
            },
            ColumnKind::Boolean => match v {
                Value::Bool(b) => FieldValue::Boolean(*b),
                _ => return Err(mismatch("a boolean")),
            },
            ColumnKind::Double => match v.as_f64() {
                Some(n) => FieldValue::Number(n),
                None => return Err(mismatch("a number")),
            },
            ColumnKind::BigInt => match integer(v) {
                Some(n) => FieldValue::Integer(n),
                None => return Err(mismatch("an integer")),
            },
            ColumnKind::Timestamp => match v.as_str().and_then(parse_date) {
                Some(d) => FieldValue::Date(d),
                None => return Err(mismatch("an RFC 3339 date")),
            },
            ColumnKind::Uuid => match v.as_str().and_then(|s| Uuid::parse_str(s).ok()) {
                Some(u) => FieldValue::Uuid(u),
                None => return Err(mismatch("a UUID")),
            },
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Integer(n) => Value::from(*n),
            FieldValue::Date(d) => Value::String(d.to_rfc3339()),
            FieldValue::Uuid(u) => Value::String(u.to_string()),
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Whole numbers only; `3.0` is accepted, `3.5` is not.
fn integer(v: &Value) -> Option<i64> {
    if let Some(i) = v.as_i64() {
        return Some(i);
    }
    let f = v.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// RFC 3339, a naive ISO datetime (taken as UTC), or a bare `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(n) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&n));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| Utc.from_utc_datetime(&n))
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_none(),
            FieldValue::String(s) => serializer.serialize_str(s),
            FieldValue::Boolean(b) => serializer.serialize_bool(*b),
            FieldValue::Number(n) => serializer.serialize_f64(*n),
            FieldValue::Integer(n) => serializer.serialize_i64(*n),
            FieldValue::Date(d) => d.serialize(serializer),
            FieldValue::Uuid(u) => u.serialize(serializer),
        }
    }
}

impl<'q> Encode<'q, Postgres> for FieldValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            FieldValue::Null => IsNull::Yes,
            FieldValue::String(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf)?,
            FieldValue::Boolean(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            FieldValue::Number(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            FieldValue::Integer(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            FieldValue::Date(d) => <DateTime<Utc> as Encode<Postgres>>::encode_by_ref(d, buf)?,
            FieldValue::Uuid(u) => <Uuid as Encode<Postgres>>::encode_by_ref(u, buf)?,
        })
    }

    /// Each variant declares its own wire type so `$n::<cast>` receives a matching binary value.
    fn produces(&self) -> Option<PgTypeInfo> {
        match self {
            FieldValue::Null => None,
            FieldValue::String(_) => Some(<String as sqlx::Type<Postgres>>::type_info()),
            FieldValue::Boolean(_) => Some(<bool as sqlx::Type<Postgres>>::type_info()),
            FieldValue::Number(_) => Some(<f64 as sqlx::Type<Postgres>>::type_info()),
            FieldValue::Integer(_) => Some(<i64 as sqlx::Type<Postgres>>::type_info()),
            FieldValue::Date(_) => Some(<DateTime<Utc> as sqlx::Type<Postgres>>::type_info()),
            FieldValue::Uuid(_) => Some(<Uuid as sqlx::Type<Postgres>>::type_info()),
        }
    }
}

impl sqlx::Type<Postgres> for FieldValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}
