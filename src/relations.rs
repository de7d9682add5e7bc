//! Relation join tables: validation of relation fields, join-table DDL, and link rows.

use crate::error::{CollectionError, OperationContext};
use crate::schema::{CollectionDefinition, CollectionIndex, FieldDefinition, RelationConfig, RelationKind};
use crate::sql::{quoted, TableNames};
use sqlx::PgConnection;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct RelationManager {
    names: TableNames,
}

fn relation_config(field: &FieldDefinition) -> Result<&RelationConfig, CollectionError> {
    field.relation.as_ref().ok_or_else(|| {
        CollectionError::field_validation(
            &field.name,
            format!("relation field \"{}\" requires a relation config", field.name),
        )
    })
}

impl RelationManager {
    pub fn new(names: TableNames) -> Self {
        RelationManager { names }
    }

    /// Check one relation field against its resolved target definition.
    pub fn validate_relation(field: &FieldDefinition, target: &CollectionDefinition) -> Result<(), CollectionError> {
        let rel = relation_config(field)?;
        if !rel.bidirectional {
            return Ok(());
        }
        let inverse = rel.inverse_side.as_ref().ok_or_else(|| {
            CollectionError::field_validation(
                &field.name,
                format!("bidirectional relation \"{}\" requires inverseSide", field.name),
            )
        })?;
        if target.field(&inverse.field).is_none() {
            return Err(CollectionError::field_validation(
                &field.name,
                format!(
                    "inverse field \"{}\" does not exist in target collection \"{}\"",
                    inverse.field, target.slug
                ),
            ));
        }
        if target.field(&inverse.display_field).is_none() {
            return Err(CollectionError::field_validation(
                &field.name,
                format!(
                    "display field \"{}\" does not exist in target collection \"{}\"",
                    inverse.display_field, target.slug
                ),
            ));
        }
        Ok(())
    }

    /// Resolve every relation target of `def` through `index` and validate each field.
    /// A target naming `def` itself (by slug or by id) resolves to `def`, so drafts can relate to themselves.
    pub fn validate_relations(def: &CollectionDefinition, index: &CollectionIndex) -> Result<(), CollectionError> {
        for field in def.fields.iter().filter(|f| f.is_relation()) {
            let rel = relation_config(field)?;
            let target = match index.by_slug(&rel.target) {
                Some(t) if t.id == def.id => def,
                Some(t) => t,
                None if rel.target == def.slug => def,
                None => {
                    return Err(CollectionError::field_validation(
                        &field.name,
                        format!("target collection \"{}\" does not exist", rel.target),
                    ))
                }
            };
            Self::validate_relation(field, target)?;
        }
        Ok(())
    }

    /// Create the join table for one relation field if it does not exist. Both ends reference
    /// `documentId` and cascade on delete.
    pub async fn create_relation_table(
        &self,
        conn: &mut PgConnection,
        source: &CollectionDefinition,
        field: &FieldDefinition,
    ) -> Result<(), CollectionError> {
        let rel = relation_config(field)?;
        let table = self.names.qualified_relation(&source.slug, &rel.target, &field.name);
        let source_ref = format!(
            "REFERENCES {} (\"documentId\") ON DELETE CASCADE",
            self.names.qualified_collection(&source.slug)
        );
        let target_ref = format!(
            "REFERENCES {} (\"documentId\") ON DELETE CASCADE",
            self.names.qualified_collection(&rel.target)
        );
        let ddl = match rel.kind {
            RelationKind::OneToOne => format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    "sourceId" UUID PRIMARY KEY {source_ref},
                    "targetId" UUID NOT NULL UNIQUE {target_ref},
                    "createdAt" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    "updatedAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#
            ),
            RelationKind::OneToMany | RelationKind::ManyToMany => format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    "id" BIGSERIAL PRIMARY KEY,
                    "sourceId" UUID NOT NULL {source_ref},
                    "targetId" UUID NOT NULL {target_ref},
                    "createdAt" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    "updatedAt" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    UNIQUE ("sourceId", "targetId")
                )
                "#
            ),
        };
        sqlx::query(&ddl)
            .execute(&mut *conn)
            .await
            .during("create relation table")?;
        tracing::debug!(table = %table, kind = ?rel.kind, "relation table ensured");
        Ok(())
    }

    pub async fn drop_relation_table(
        &self,
        conn: &mut PgConnection,
        source_slug: &str,
        target_slug: &str,
        field: &str,
    ) -> Result<(), CollectionError> {
        let table = self.names.qualified_relation(source_slug, target_slug, field);
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(&mut *conn)
            .await
            .during("drop relation table")?;
        tracing::debug!(table = %table, "relation table dropped");
        Ok(())
    }

    /// Rename a join table after its source (and possibly its target) slug changed.
    pub async fn rename_relation_table(
        &self,
        conn: &mut PgConnection,
        from: (&str, &str),
        to: (&str, &str),
        field: &str,
    ) -> Result<(), CollectionError> {
        let old = self.names.qualified_relation(from.0, from.1, field);
        let new = self.names.relation(to.0, to.1, field);
        sqlx::query(&format!("ALTER TABLE IF EXISTS {} RENAME TO {}", old, quoted(&new)))
            .execute(&mut *conn)
            .await
            .during("rename relation table")?;
        Ok(())
    }

    /// Insert link rows in the given order.
    pub async fn insert_links(
        &self,
        conn: &mut PgConnection,
        source_slug: &str,
        field: &FieldDefinition,
        source_id: Uuid,
        targets: &[Uuid],
    ) -> Result<(), CollectionError> {
        let rel = relation_config(field)?;
        let sql = format!(
            r#"INSERT INTO {} ("sourceId", "targetId", "createdAt", "updatedAt") VALUES ($1, $2, NOW(), NOW())"#,
            self.names.qualified_relation(source_slug, &rel.target, &field.name)
        );
        for target in targets {
            sqlx::query(&sql)
                .bind(source_id)
                .bind(target)
                .execute(&mut *conn)
                .await
                .during("insert relation")?;
        }
        Ok(())
    }

    /// Remove every link of `source_id` for one relation field.
    pub async fn clear_links(
        &self,
        conn: &mut PgConnection,
        source_slug: &str,
        field: &FieldDefinition,
        source_id: Uuid,
    ) -> Result<u64, CollectionError> {
        let rel = relation_config(field)?;
        let result = sqlx::query(&format!(
            r#"DELETE FROM {} WHERE "sourceId" = $1"#,
            self.names.qualified_relation(source_slug, &rel.target, &field.name)
        ))
        .bind(source_id)
        .execute(&mut *conn)
        .await
        .during("delete relations")?;
        Ok(result.rows_affected())
    }

    /// Target documentIds linked from `source_id`, in link order.
    pub async fn related_ids(
        &self,
        conn: &mut PgConnection,
        source_slug: &str,
        field: &FieldDefinition,
        source_id: Uuid,
    ) -> Result<Vec<Uuid>, CollectionError> {
        let rel = relation_config(field)?;
        sqlx::query_scalar::<_, Uuid>(&format!(
            r#"SELECT "targetId" FROM {} WHERE "sourceId" = $1 ORDER BY "createdAt", "targetId""#,
            self.names.qualified_relation(source_slug, &rel.target, &field.name)
        ))
        .bind(source_id)
        .fetch_all(&mut *conn)
        .await
        .during("list relations")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CollectionIndex;
    use chrono::Utc;
    use serde_json::json;

    fn def(id: i64, slug: &str, fields: serde_json::Value) -> CollectionDefinition {
        CollectionDefinition {
            id,
            document_id: Uuid::new_v4(),
            name: slug.into(),
            slug: slug.into(),
            description: None,
            parent_id: None,
            fields: serde_json::from_value(fields).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn categories() -> CollectionDefinition {
        def(1, "categories", json!([
            { "name": "title", "type": "string" },
            { "name": "posts", "type": "relation", "relation": { "type": "manyToMany", "target": "posts" } }
        ]))
    }

    #[test]
    fn bidirectional_needs_existing_display_field() {
        let index = CollectionIndex::new(vec![categories()]);
        let ok = def(0, "posts", json!([{
            "name": "category", "type": "relation",
            "relation": { "type": "manyToMany", "target": "categories", "bidirectional": true,
                          "inverseSide": { "field": "posts", "displayField": "title" } }
        }]));
        assert!(RelationManager::validate_relations(&ok, &index).is_ok());

        let bad = def(0, "posts", json!([{
            "name": "category", "type": "relation",
            "relation": { "type": "manyToMany", "target": "categories", "bidirectional": true,
                          "inverseSide": { "field": "posts", "displayField": "nonexistent" } }
        }]));
        let err = RelationManager::validate_relations(&bad, &index).unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn bidirectional_without_inverse_side_fails() {
        let index = CollectionIndex::new(vec![categories()]);
        let bad = def(0, "posts", json!([{
            "name": "category", "type": "relation",
            "relation": { "type": "oneToMany", "target": "categories", "bidirectional": true }
        }]));
        assert!(RelationManager::validate_relations(&bad, &index).is_err());
    }

    #[test]
    fn missing_target_fails_and_self_target_resolves_to_draft() {
        let index = CollectionIndex::new(vec![]);
        let missing = def(0, "posts", json!([{
            "name": "author", "type": "relation",
            "relation": { "type": "oneToOne", "target": "authors" }
        }]));
        assert!(RelationManager::validate_relations(&missing, &index).is_err());

        let selfref = def(0, "pages", json!([
            { "name": "title", "type": "string" },
            { "name": "children", "type": "relation", "relation": { "type": "oneToMany", "target": "pages" } },
            { "name": "parent", "type": "relation",
              "relation": { "type": "oneToOne", "target": "pages", "bidirectional": true,
                            "inverseSide": { "field": "children", "displayField": "title" } } }
        ]));
        assert!(RelationManager::validate_relations(&selfref, &index).is_ok());
    }

    #[test]
    fn bidirectional_needs_existing_inverse_field() {
        let index = CollectionIndex::new(vec![def(1, "categories", json!([{ "name": "title", "type": "string" }]))]);
        let posts = def(0, "posts", json!([{
            "name": "category", "type": "relation",
            "relation": { "type": "oneToMany", "target": "categories", "bidirectional": true,
                          "inverseSide": { "field": "doesNotExist", "displayField": "title" } }
        }]));
        match RelationManager::validate_relations(&posts, &index).unwrap_err() {
            CollectionError::FieldValidation { field, message } => {
                assert_eq!(field.as_deref(), Some("category"));
                assert!(message.contains("doesNotExist"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
