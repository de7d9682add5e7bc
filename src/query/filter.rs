//! Declarative record filters parsed from JSON and compiled into parameterized WHERE clauses.
//!
//! Shape: `{ "<field>": { "<op>": <value>, ... }, "$or": [<filter>, ...], "$and": [<filter>, ...] }`.
//! A bare value in place of the operator object means `eq`.

use crate::error::CollectionError;
use crate::schema::{CollectionDefinition, ColumnKind};
use crate::sql::{quoted, FieldValue, QueryBuf, MAIN_ALIAS};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Deepest accepted `$or` / `$and` nesting.
pub const MAX_FILTER_DEPTH: usize = 16;

#[derive(Clone, Debug, PartialEq)]
pub enum Operator {
    Eq(Value),
    Neq(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// Substring match; `%`, `_` and `\` in the pattern are literal.
    Like(String),
    In(Vec<Value>),
    Between(Value, Value),
    /// `true` selects NULLs, `false` non-NULLs.
    Null(bool),
    /// `true` selects non-NULLs, `false` NULLs.
    NotNull(bool),
}

impl Operator {
    fn parse(field: &str, op: &str, v: &Value) -> Result<Operator, CollectionError> {
        let invalid = |expected: &str| {
            CollectionError::field_validation(
                field,
                format!("operator \"{}\" on \"{}\" expects {}", op, field, expected),
            )
        };
        Ok(match op {
            "eq" => Operator::Eq(v.clone()),
            "neq" => Operator::Neq(v.clone()),
            "gt" => Operator::Gt(v.clone()),
            "gte" => Operator::Gte(v.clone()),
            "lt" => Operator::Lt(v.clone()),
            "lte" => Operator::Lte(v.clone()),
            "like" => Operator::Like(v.as_str().ok_or_else(|| invalid("a string"))?.to_string()),
            "in" => Operator::In(v.as_array().ok_or_else(|| invalid("an array"))?.clone()),
            "between" => match v.as_array().map(Vec::as_slice) {
                Some([lo, hi]) => Operator::Between(lo.clone(), hi.clone()),
                _ => return Err(invalid("an array of two values")),
            },
            "null" => Operator::Null(v.as_bool().ok_or_else(|| invalid("a boolean"))?),
            "notNull" => Operator::NotNull(v.as_bool().ok_or_else(|| invalid("a boolean"))?),
            other => {
                return Err(CollectionError::field_validation(
                    field,
                    format!("unknown filter operator \"{}\" on \"{}\"", other, field),
                ))
            }
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<(String, Vec<Operator>)>,
    pub any: Vec<Filter>,
    pub all: Vec<Filter>,
}

impl Filter {
    /// `field = value`.
    pub fn eq(field: impl Into<String>, value: Value) -> Filter {
        Filter {
            conditions: vec![(field.into(), vec![Operator::Eq(value)])],
            ..Filter::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.any.is_empty() && self.all.is_empty()
    }

    pub fn from_json(v: &Value) -> Result<Filter, CollectionError> {
        Self::parse(v, 0)
    }

    fn parse(v: &Value, depth: usize) -> Result<Filter, CollectionError> {
        if depth > MAX_FILTER_DEPTH {
            return Err(CollectionError::validation(format!(
                "filter nesting exceeds {} levels",
                MAX_FILTER_DEPTH
            )));
        }
        let obj = v
            .as_object()
            .ok_or_else(|| CollectionError::validation("filter must be a JSON object"))?;
        let mut filter = Filter::default();
        for (key, value) in obj {
            match key.as_str() {
                "$or" | "$and" => {
                    let items = value.as_array().ok_or_else(|| {
                        CollectionError::validation(format!("\"{}\" expects an array of filters", key))
                    })?;
                    let parsed = items
                        .iter()
                        .map(|item| Self::parse(item, depth + 1))
                        .collect::<Result<Vec<_>, _>>()?;
                    if key == "$or" {
                        filter.any.extend(parsed);
                    } else {
                        filter.all.extend(parsed);
                    }
                }
                k if k.starts_with('$') => {
                    return Err(CollectionError::validation(format!(
                        "unknown logical operator \"{}\"",
                        k
                    )))
                }
                field => {
                    let ops = match value {
                        Value::Object(ops) => ops
                            .iter()
                            .map(|(op, arg)| Operator::parse(field, op, arg))
                            .collect::<Result<Vec<_>, _>>()?,
                        other => vec![Operator::Eq(other.clone())],
                    };
                    filter.conditions.push((field.to_string(), ops));
                }
            }
        }
        Ok(filter)
    }

    /// WHERE body for this filter, pushing values into `q`. None when there is nothing to filter on.
    pub fn to_sql(&self, def: &CollectionDefinition, q: &mut QueryBuf) -> Result<Option<String>, CollectionError> {
        let parts = self.compile(def, q)?;
        Ok(if parts.is_empty() {
            None
        } else {
            Some(parts.join(" AND "))
        })
    }

    fn compile(&self, def: &CollectionDefinition, q: &mut QueryBuf) -> Result<Vec<String>, CollectionError> {
        let mut parts = Vec::new();
        for (field, ops) in &self.conditions {
            let kind = resolve_column(def, field)?;
            let column = format!("{}.{}", MAIN_ALIAS, quoted(field));
            for op in ops {
                parts.push(compile_operator(&column, field, kind, op, q)?);
            }
        }
        if !self.any.is_empty() {
            let groups = self
                .any
                .iter()
                .map(|f| f.compile_group(def, q))
                .collect::<Result<Vec<_>, _>>()?;
            parts.push(format!("({})", groups.join(" OR ")));
        }
        for f in &self.all {
            parts.push(f.compile_group(def, q)?);
        }
        Ok(parts)
    }

    fn compile_group(&self, def: &CollectionDefinition, q: &mut QueryBuf) -> Result<String, CollectionError> {
        let parts = self.compile(def, q)?;
        Ok(if parts.is_empty() {
            "TRUE".to_string()
        } else {
            format!("({})", parts.join(" AND "))
        })
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        Filter::from_json(&v).map_err(serde::de::Error::custom)
    }
}

/// Column kind of a filterable or sortable name; relation and unknown fields are rejected.
pub(crate) fn resolve_column(def: &CollectionDefinition, field: &str) -> Result<ColumnKind, CollectionError> {
    if let Some(kind) = def.column_kind(field) {
        return Ok(kind);
    }
    let message = match def.field(field) {
        Some(_) => format!("relation field \"{}\" cannot be filtered or sorted on", field),
        None => format!("unknown field \"{}\" in collection \"{}\"", field, def.slug),
    };
    Err(CollectionError::field_validation(field, message))
}

/// Escape LIKE metacharacters so the pattern matches literally.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn compile_operator(
    column: &str,
    field: &str,
    kind: ColumnKind,
    op: &Operator,
    q: &mut QueryBuf,
) -> Result<String, CollectionError> {
    let bind = |q: &mut QueryBuf, v: &Value| -> Result<String, CollectionError> {
        Ok(q.placeholder(FieldValue::from_json(kind, field, v)?, kind))
    };
    Ok(match op {
        Operator::Eq(Value::Null) | Operator::Null(true) | Operator::NotNull(false) => {
            format!("{} IS NULL", column)
        }
        Operator::Neq(Value::Null) | Operator::Null(false) | Operator::NotNull(true) => {
            format!("{} IS NOT NULL", column)
        }
        Operator::Eq(v) => format!("{} = {}", column, bind(q, v)?),
        Operator::Neq(v) => format!("{} <> {}", column, bind(q, v)?),
        Operator::Gt(v) => format!("{} > {}", column, bind(q, v)?),
        Operator::Gte(v) => format!("{} >= {}", column, bind(q, v)?),
        Operator::Lt(v) => format!("{} < {}", column, bind(q, v)?),
        Operator::Lte(v) => format!("{} <= {}", column, bind(q, v)?),
        Operator::Like(pattern) => {
            let ph = q.placeholder(
                FieldValue::String(format!("%{}%", escape_like(pattern))),
                ColumnKind::Text,
            );
            format!("{}::text LIKE {}", column, ph)
        }
        Operator::In(values) if values.is_empty() => "FALSE".to_string(),
        Operator::In(values) => {
            let placeholders = values
                .iter()
                .map(|v| bind(q, v))
                .collect::<Result<Vec<_>, _>>()?;
            format!("{} IN ({})", column, placeholders.join(", "))
        }
        Operator::Between(lo, hi) => {
            let lo = bind(q, lo)?;
            let hi = bind(q, hi)?;
            format!("{} BETWEEN {} AND {}", column, lo, hi)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn posts() -> CollectionDefinition {
        CollectionDefinition {
            id: 1,
            document_id: Uuid::nil(),
            name: "Posts".into(),
            slug: "posts".into(),
            description: None,
            parent_id: None,
            fields: serde_json::from_value(json!([
                { "name": "title", "type": "string" },
                { "name": "views", "type": "integer" },
                { "name": "published", "type": "boolean" },
                { "name": "category", "type": "relation",
                  "relation": { "type": "oneToMany", "target": "categories" } }
            ]))
            .unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn compile(v: serde_json::Value) -> Result<(Option<String>, QueryBuf), CollectionError> {
        let mut q = QueryBuf::new();
        let sql = Filter::from_json(&v)?.to_sql(&posts(), &mut q)?;
        Ok((sql, q))
    }

    #[test]
    fn comparison_and_range_operators() {
        let (sql, q) = compile(json!({ "views": { "gte": 10, "lt": 100 } })).unwrap();
        assert_eq!(
            sql.unwrap(),
            "main.\"views\" >= $1::bigint AND main.\"views\" < $2::bigint"
        );
        assert_eq!(q.params, vec![FieldValue::Integer(10), FieldValue::Integer(100)]);

        let (sql, _) = compile(json!({ "views": { "between": [1, 5] } })).unwrap();
        assert_eq!(sql.unwrap(), "main.\"views\" BETWEEN $1::bigint AND $2::bigint");
    }

    #[test]
    fn bare_value_means_eq_and_null_means_is_null() {
        let (sql, q) = compile(json!({ "title": "Hello" })).unwrap();
        assert_eq!(sql.unwrap(), "main.\"title\" = $1::text");
        assert_eq!(q.params.len(), 1);

        let (sql, q) = compile(json!({ "title": { "eq": null }, "views": { "notNull": true } })).unwrap();
        assert_eq!(sql.unwrap(), "main.\"title\" IS NULL AND main.\"views\" IS NOT NULL");
        assert!(q.params.is_empty());
    }

    #[test]
    fn like_is_escaped_substring() {
        let (sql, q) = compile(json!({ "title": { "like": "50%_off" } })).unwrap();
        assert_eq!(sql.unwrap(), "main.\"title\"::text LIKE $1::text");
        assert_eq!(q.params, vec![FieldValue::String("%50\\%\\_off%".into())]);
    }

    #[test]
    fn empty_in_matches_nothing() {
        let (sql, _) = compile(json!({ "views": { "in": [] } })).unwrap();
        assert_eq!(sql.unwrap(), "FALSE");
    }

    #[test]
    fn or_groups_are_parenthesized() {
        let (sql, q) = compile(json!({
            "published": true,
            "$or": [ { "title": { "like": "rust" } }, { "views": { "gt": 1000 } } ]
        }))
        .unwrap();
        assert_eq!(
            sql.unwrap(),
            "main.\"published\" = $1::boolean AND ((main.\"title\"::text LIKE $2::text) OR (main.\"views\" > $3::bigint))"
        );
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn and_items_follow_plain_conditions() {
        let (sql, q) = compile(json!({
            "views": { "gt": 1 },
            "$and": [ { "title": "a" }, { "published": true } ]
        }))
        .unwrap();
        assert_eq!(
            sql.unwrap(),
            "main.\"views\" > $1::bigint AND (main.\"title\" = $2::text) AND (main.\"published\" = $3::boolean)"
        );
        assert_eq!(
            q.params,
            vec![FieldValue::Integer(1), FieldValue::String("a".into()), FieldValue::Boolean(true)]
        );
    }

    #[test]
    fn or_nested_in_and_keeps_its_own_parentheses() {
        let (sql, q) = compile(json!({
            "$and": [
                { "$or": [ { "title": "a" }, { "views": { "lt": 5 } } ] },
                { "published": false }
            ]
        }))
        .unwrap();
        assert_eq!(
            sql.unwrap(),
            "(((main.\"title\" = $1::text) OR (main.\"views\" < $2::bigint))) AND (main.\"published\" = $3::boolean)"
        );
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn rejects_unknown_fields_operators_and_relations() {
        assert!(compile(json!({ "nope": 1 })).is_err());
        assert!(compile(json!({ "title": { "regex": "x" } })).is_err());
        assert!(compile(json!({ "category": { "eq": 1 } })).is_err());
        assert!(compile(json!({ "$not": [] })).is_err());
        assert!(compile(json!({ "views": { "eq": "many" } })).is_err());
        assert!(compile(json!([1, 2])).is_err());
    }

    #[test]
    fn base_columns_are_filterable() {
        let id = Uuid::new_v4();
        let (sql, q) = compile(json!({ "documentId": id.to_string() })).unwrap();
        assert_eq!(sql.unwrap(), "main.\"documentId\" = $1::uuid");
        assert_eq!(q.params, vec![FieldValue::Uuid(id)]);
    }

    #[test]
    fn empty_filter_compiles_to_nothing() {
        let (sql, _) = compile(json!({})).unwrap();
        assert!(sql.is_none());
    }

    #[test]
    fn nesting_is_bounded() {
        let mut v = json!({ "title": "x" });
        for _ in 0..=MAX_FILTER_DEPTH {
            v = json!({ "$and": [v] });
        }
        assert!(Filter::from_json(&v).is_err());
    }
}
