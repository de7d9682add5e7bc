//! Builds parameterized SELECT, INSERT, UPDATE, DELETE against collection tables.

use super::ident::{quoted, TableNames};
use super::params::FieldValue;
use crate::schema::{CollectionDefinition, ColumnKind, BASE_COLUMNS};
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;
use uuid::Uuid;

/// Alias of the collection table in record SELECTs.
pub const MAIN_ALIAS: &str = "main";

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<FieldValue>,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf::default()
    }

    pub fn push_param(&mut self, v: FieldValue) -> u32 {
        self.params.push(v);
        self.params.len() as u32
    }

    /// Push a value and return its `$n::<cast>` placeholder.
    pub fn placeholder(&mut self, v: FieldValue, kind: ColumnKind) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, kind.cast())
    }

    /// Bind every parameter in order.
    pub fn query(&self) -> Query<'_, Postgres, PgArguments> {
        tracing::debug!(sql = %self.sql, params = ?self.params, "query");
        // NULL binds as text; a cached statement would pin that parameter type for later typed binds.
        let cacheable = !self.params.iter().any(FieldValue::is_null);
        self.params
            .iter()
            .cloned()
            .fold(sqlx::query(&self.sql).persistent(cacheable), |q, p| q.bind(p))
    }
}

/// Base columns then scalar fields, optionally qualified by a table alias.
pub fn select_column_list(def: &CollectionDefinition, alias: Option<&str>) -> String {
    let prefix = alias.map(|a| format!("{}.", a)).unwrap_or_default();
    BASE_COLUMNS
        .iter()
        .map(|(name, _)| *name)
        .chain(def.scalar_fields().map(|f| f.name.as_str()))
        .map(|name| format!("{}{}", prefix, quoted(name)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Correlated subquery yielding `[{"id": <documentId>, "data": <row>}, ...]` for one relation field.
fn relation_subquery(names: &TableNames, source_slug: &str, target_slug: &str, field: &str) -> String {
    format!(
        "(SELECT COALESCE(json_agg(json_build_object('id', t.\"documentId\", 'data', row_to_json(t)) \
         ORDER BY r.\"createdAt\", t.\"id\"), '[]'::json) \
         FROM {} r JOIN {} t ON t.\"documentId\" = r.\"targetId\" \
         WHERE r.\"sourceId\" = {}.\"documentId\")",
        names.qualified_relation(source_slug, target_slug, field),
        names.qualified_collection(target_slug),
        MAIN_ALIAS
    )
}

/// Clauses of a record SELECT; placeholders in `where_clause` refer to params already in the buffer.
#[derive(Debug, Default)]
pub struct SelectParts {
    pub where_clause: Option<String>,
    pub order_by: Vec<String>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

/// SELECT records with each relation (when requested) as a scalar json subquery column named after the field.
pub fn select_records(
    q: &mut QueryBuf,
    names: &TableNames,
    def: &CollectionDefinition,
    include_relations: bool,
    parts: &SelectParts,
) {
    let mut select_parts = vec![select_column_list(def, Some(MAIN_ALIAS))];
    if include_relations {
        for (field, rel) in def.relation_fields() {
            select_parts.push(format!(
                "{} AS {}",
                relation_subquery(names, &def.slug, &rel.target, &field.name),
                quoted(&field.name)
            ));
        }
    }
    let where_clause = parts
        .where_clause
        .as_ref()
        .map(|w| format!(" WHERE {}", w))
        .unwrap_or_default();
    let order_clause = if parts.order_by.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", parts.order_by.join(", "))
    };
    let limit_clause = parts.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = parts.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} {}{}{}{}{}",
        select_parts.join(", "),
        names.qualified_collection(&def.slug),
        MAIN_ALIAS,
        where_clause,
        order_clause,
        limit_clause,
        offset_clause
    );
}

/// COUNT(*) under the same filter as the page query.
pub fn count_records(q: &mut QueryBuf, names: &TableNames, def: &CollectionDefinition, where_clause: Option<&str>) {
    q.sql = format!(
        "SELECT COUNT(*) FROM {} {}{}",
        names.qualified_collection(&def.slug),
        MAIN_ALIAS,
        where_clause.map(|w| format!(" WHERE {}", w)).unwrap_or_default()
    );
}

/// One coerced column assignment.
pub type ColumnValue<'a> = (&'a str, ColumnKind, FieldValue);

/// INSERT a record with a fresh documentId; timestamps come from the database clock.
pub fn insert_record(
    names: &TableNames,
    def: &CollectionDefinition,
    document_id: Uuid,
    values: &[ColumnValue<'_>],
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = vec![quoted("documentId"), quoted("createdAt"), quoted("updatedAt")];
    let mut placeholders = vec![
        q.placeholder(FieldValue::Uuid(document_id), ColumnKind::Uuid),
        "NOW()".to_string(),
        "NOW()".to_string(),
    ];
    for (name, kind, value) in values {
        cols.push(quoted(name));
        placeholders.push(q.placeholder(value.clone(), *kind));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        names.qualified_collection(&def.slug),
        cols.join(", "),
        placeholders.join(", "),
        select_column_list(def, None)
    );
    q
}

/// UPDATE by documentId: SET only the given columns, always touching updatedAt.
pub fn update_record(
    names: &TableNames,
    def: &CollectionDefinition,
    document_id: Uuid,
    values: &[ColumnValue<'_>],
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::with_capacity(values.len() + 1);
    for (name, kind, value) in values {
        let ph = q.placeholder(value.clone(), *kind);
        sets.push(format!("{} = {}", quoted(name), ph));
    }
    sets.push(format!("{} = NOW()", quoted("updatedAt")));
    let id_ph = q.placeholder(FieldValue::Uuid(document_id), ColumnKind::Uuid);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        names.qualified_collection(&def.slug),
        sets.join(", "),
        quoted("documentId"),
        id_ph,
        select_column_list(def, None)
    );
    q
}

/// DELETE by documentId.
pub fn delete_record(names: &TableNames, def: &CollectionDefinition, document_id: Uuid) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_ph = q.placeholder(FieldValue::Uuid(document_id), ColumnKind::Uuid);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        names.qualified_collection(&def.slug),
        quoted("documentId"),
        id_ph
    );
    q
}

/// Row lock on the record for the rest of the transaction.
pub fn lock_record(names: &TableNames, def: &CollectionDefinition, document_id: Uuid) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_ph = q.placeholder(FieldValue::Uuid(document_id), ColumnKind::Uuid);
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {} FOR UPDATE",
        quoted("id"),
        names.qualified_collection(&def.slug),
        quoted("documentId"),
        id_ph
    );
    q
}

/// Probe for another row already holding `value` in a unique column.
pub fn unique_probe(
    names: &TableNames,
    def: &CollectionDefinition,
    column: &str,
    kind: ColumnKind,
    value: FieldValue,
    exclude: Option<Uuid>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let value_ph = q.placeholder(value, kind);
    let exclude_clause = exclude
        .map(|id| {
            let ph = q.placeholder(FieldValue::Uuid(id), ColumnKind::Uuid);
            format!(" AND {} <> {}", quoted("documentId"), ph)
        })
        .unwrap_or_default();
    q.sql = format!(
        "SELECT 1 FROM {} WHERE {} = {}{} LIMIT 1",
        names.qualified_collection(&def.slug),
        quoted(column),
        value_ph,
        exclude_clause
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDefinition;
    use chrono::Utc;
    use serde_json::json;

    fn posts() -> CollectionDefinition {
        let fields: Vec<FieldDefinition> = serde_json::from_value(json!([
            { "name": "title", "type": "string", "required": true },
            { "name": "views", "type": "integer" },
            { "name": "category", "type": "relation",
              "relation": { "type": "manyToMany", "target": "categories" } }
        ]))
        .unwrap();
        CollectionDefinition {
            id: 1,
            document_id: Uuid::nil(),
            name: "Posts".into(),
            slug: "posts".into(),
            description: None,
            parent_id: None,
            fields,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn column_list_skips_relations() {
        assert_eq!(
            select_column_list(&posts(), None),
            "\"id\", \"documentId\", \"createdAt\", \"updatedAt\", \"title\", \"views\""
        );
    }

    #[test]
    fn insert_binds_every_value_with_a_cast() {
        let names = TableNames::new("public", "cm");
        let q = insert_record(
            &names,
            &posts(),
            Uuid::nil(),
            &[("title", ColumnKind::Text, FieldValue::String("Hello".into()))],
        );
        assert!(q.sql.starts_with("INSERT INTO \"public\".\"cm_posts\" (\"documentId\", \"createdAt\", \"updatedAt\", \"title\")"));
        assert!(q.sql.contains("VALUES ($1::uuid, NOW(), NOW(), $2::text)"));
        assert!(!q.sql.contains("Hello"));
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn update_puts_document_id_last() {
        let names = TableNames::new("public", "cm");
        let q = update_record(
            &names,
            &posts(),
            Uuid::nil(),
            &[("views", ColumnKind::BigInt, FieldValue::Integer(3))],
        );
        assert!(q.sql.contains("SET \"views\" = $1::bigint, \"updatedAt\" = NOW() WHERE \"documentId\" = $2::uuid"));
    }

    #[test]
    fn select_with_relations_adds_subquery_per_field() {
        let names = TableNames::new("public", "cm");
        let mut q = QueryBuf::new();
        select_records(&mut q, &names, &posts(), true, &SelectParts::default());
        assert!(q.sql.contains("\"public\".\"cm_rel_posts_categories_category\" r"));
        assert!(q.sql.contains("AS \"category\""));
        assert!(q.sql.contains("FROM \"public\".\"cm_posts\" main"));

        let mut plain = QueryBuf::new();
        select_records(&mut plain, &names, &posts(), false, &SelectParts::default());
        assert!(!plain.sql.contains("json_agg"));
    }
}
