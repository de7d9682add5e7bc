//! Executes record queries: filter, sort, page or cursor, optional relation inclusion.

use super::filter::{resolve_column, Filter};
use super::options::{Pagination, PaginationMeta, QueryOptions, QueryResult};
use crate::error::{CollectionError, OperationContext};
use crate::record::Record;
use crate::schema::{CollectionDefinition, ColumnKind};
use crate::sql::{count_records, quoted, select_records, FieldValue, QueryBuf, SelectParts, TableNames, MAIN_ALIAS};
use sqlx::{PgConnection, Row};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct QueryEngine {
    names: TableNames,
}

impl QueryEngine {
    pub fn new(names: TableNames) -> Self {
        QueryEngine { names }
    }

    /// WHERE body shared by the page query and its COUNT.
    fn where_clause(
        &self,
        def: &CollectionDefinition,
        filter: Option<&Filter>,
        cursor: Option<i64>,
        q: &mut QueryBuf,
    ) -> Result<Option<String>, CollectionError> {
        let mut parts = Vec::new();
        let filter = filter.filter(|f| !f.is_empty());
        if let Some(sql) = filter.map(|f| f.to_sql(def, q)).transpose()?.flatten() {
            parts.push(sql);
        }
        if let Some(cursor) = cursor {
            let ph = q.placeholder(FieldValue::Integer(cursor), ColumnKind::BigInt);
            parts.push(format!("{}.{} > {}", MAIN_ALIAS, quoted("id"), ph));
        }
        Ok(if parts.is_empty() {
            None
        } else {
            Some(parts.join(" AND "))
        })
    }

    /// ORDER BY terms. The internal id is always the final key so ordering is total.
    fn order_by(
        &self,
        def: &CollectionDefinition,
        options: &QueryOptions,
        cursor_mode: bool,
    ) -> Result<Vec<String>, CollectionError> {
        let id_asc = format!("{}.{} ASC", MAIN_ALIAS, quoted("id"));
        if cursor_mode {
            if !options.sort.is_empty() {
                return Err(CollectionError::field_validation(
                    "sort",
                    "custom sort cannot be combined with cursor pagination",
                ));
            }
            return Ok(vec![id_asc]);
        }
        let mut terms = Vec::with_capacity(options.sort.len() + 1);
        for s in &options.sort {
            resolve_column(def, &s.field)?;
            terms.push(format!("{}.{} {}", MAIN_ALIAS, quoted(&s.field), s.direction.sql()));
        }
        if !options.sort.iter().any(|s| s.field == "id") {
            terms.push(id_asc);
        }
        Ok(terms)
    }

    /// Build the page query and the matching COUNT query without touching the database.
    pub fn build(
        &self,
        def: &CollectionDefinition,
        options: &QueryOptions,
    ) -> Result<(QueryBuf, QueryBuf, Option<Pagination>), CollectionError> {
        let pagination = options.pagination.as_ref().map(Pagination::normalized).transpose()?;
        let (limit, offset, cursor) = match pagination {
            Some(Pagination::Page { page, per_page }) => {
                (Some(per_page), Some((page as u64 - 1) * per_page as u64), None)
            }
            Some(Pagination::Cursor { limit, cursor }) => (Some(limit), None, cursor),
            None => (None, None, None),
        };
        let order_by = self.order_by(def, options, matches!(pagination, Some(Pagination::Cursor { .. })))?;

        let mut count = QueryBuf::new();
        let count_where = self.where_clause(def, options.filter.as_ref(), None, &mut count)?;
        count_records(&mut count, &self.names, def, count_where.as_deref());

        let mut select = QueryBuf::new();
        let where_clause = self.where_clause(def, options.filter.as_ref(), cursor, &mut select)?;
        select_records(
            &mut select,
            &self.names,
            def,
            options.include_relations,
            &SelectParts {
                where_clause,
                order_by,
                limit,
                offset: offset.filter(|o| *o > 0),
            },
        );
        Ok((select, count, pagination))
    }

    pub async fn execute(
        &self,
        conn: &mut PgConnection,
        def: &CollectionDefinition,
        options: &QueryOptions,
    ) -> Result<QueryResult, CollectionError> {
        let (select, count, pagination) = self.build(def, options)?;
        let total: i64 = count
            .query()
            .fetch_one(&mut *conn)
            .await
            .during("count records")?
            .try_get(0)
            .during("count records")?;
        let total = total.max(0) as u64;
        let rows = select.query().fetch_all(&mut *conn).await.during("query records")?;
        let data = rows
            .iter()
            .map(|row| Record::from_row(def, row, options.include_relations))
            .collect::<Result<Vec<_>, _>>()?;
        let meta = match pagination {
            None => PaginationMeta::unpaginated(total),
            Some(Pagination::Page { page, per_page }) => PaginationMeta::page(page, per_page, total),
            Some(Pagination::Cursor { limit, cursor }) => {
                PaginationMeta::cursor(limit, cursor, total, data.len(), data.last().map(|r| r.id))
            }
        };
        Ok(QueryResult { data, meta })
    }

    /// Single record by documentId.
    pub async fn find_one(
        &self,
        conn: &mut PgConnection,
        def: &CollectionDefinition,
        document_id: Uuid,
        include_relations: bool,
    ) -> Result<Option<Record>, CollectionError> {
        let mut q = QueryBuf::new();
        let filter = Filter::eq("documentId", serde_json::Value::String(document_id.to_string()));
        let where_clause = self.where_clause(def, Some(&filter), None, &mut q)?;
        select_records(
            &mut q,
            &self.names,
            def,
            include_relations,
            &SelectParts {
                where_clause,
                limit: Some(1),
                ..SelectParts::default()
            },
        );
        let row = q.query().fetch_optional(&mut *conn).await.during("get record")?;
        row.map(|r| Record::from_row(def, &r, include_relations)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{SortDirection, SortField};
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
                { "name": "title", "type": "string" },
                { "name": "views", "type": "integer" },
                { "name": "tags", "type": "relation", "relation": { "type": "manyToMany", "target": "tags" } }
            ]))
            .unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn engine() -> QueryEngine {
        QueryEngine::new(TableNames::new("public", "cm"))
    }

    #[test]
    fn page_mode_offsets_and_appends_id_tiebreaker() {
        let opts = QueryOptions {
            pagination: Some(Pagination::Page { page: 3, per_page: 10 }),
            sort: vec![SortField { field: "views".into(), direction: SortDirection::Desc }],
            ..QueryOptions::default()
        };
        let (select, count, _) = engine().build(&posts(), &opts).unwrap();
        assert!(select
            .sql
            .ends_with("ORDER BY main.\"views\" DESC, main.\"id\" ASC LIMIT 10 OFFSET 20"));
        assert_eq!(count.sql, "SELECT COUNT(*) FROM \"public\".\"cm_posts\" main");
    }

    #[test]
    fn cursor_mode_filters_by_id_but_count_does_not() {
        let opts = QueryOptions {
            pagination: Some(Pagination::Cursor { limit: 2, cursor: Some(5) }),
            filter: Some(Filter::from_json(&json!({ "views": { "gt": 1 } })).unwrap()),
            ..QueryOptions::default()
        };
        let (select, count, _) = engine().build(&posts(), &opts).unwrap();
        assert!(select
            .sql
            .contains("WHERE main.\"views\" > $1::bigint AND main.\"id\" > $2::bigint ORDER BY main.\"id\" ASC LIMIT 2"));
        assert_eq!(select.params.len(), 2);
        assert!(count.sql.ends_with("WHERE main.\"views\" > $1::bigint"));
        assert_eq!(count.params.len(), 1);
    }

    #[test]
    fn empty_filter_adds_no_where_clause() {
        let opts = QueryOptions {
            filter: Some(Filter::default()),
            ..QueryOptions::default()
        };
        let (select, count, _) = engine().build(&posts(), &opts).unwrap();
        assert!(!select.sql.contains("WHERE"));
        assert!(!count.sql.contains("WHERE"));
    }

    #[test]
    fn cursor_mode_rejects_custom_sort() {
        let opts = QueryOptions {
            pagination: Some(Pagination::Cursor { limit: 2, cursor: None }),
            sort: vec![SortField { field: "title".into(), direction: SortDirection::Asc }],
            ..QueryOptions::default()
        };
        assert!(matches!(
            engine().build(&posts(), &opts),
            Err(CollectionError::FieldValidation { .. })
        ));
    }

    #[test]
    fn sorting_on_unknown_or_relation_field_fails() {
        for field in ["missing", "tags"] {
            let opts = QueryOptions {
                sort: vec![SortField { field: field.into(), direction: SortDirection::Asc }],
                ..QueryOptions::default()
            };
            assert!(engine().build(&posts(), &opts).is_err(), "{field}");
        }
    }

    #[test]
    fn first_page_has_no_offset() {
        let opts = QueryOptions {
            pagination: Some(Pagination::Page { page: 1, per_page: 5 }),
            ..QueryOptions::default()
        };
        let (select, _, _) = engine().build(&posts(), &opts).unwrap();
        assert!(select.sql.ends_with("LIMIT 5"));
    }
}
