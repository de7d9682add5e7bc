//! Keeps physical collection tables in step with their definitions: create, diff-and-alter, rename, drop.

use crate::error::{CollectionError, OperationContext};
use crate::relations::RelationManager;
use crate::schema::{CollectionDefinition, FieldDefinition};
use crate::sql::{introspect, quoted, TableNames};
use sqlx::PgConnection;

/// One DDL step derived from comparing an old field list with a new one.
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaChange {
    DropColumn(String),
    AddColumn(FieldDefinition),
    /// Drop then add; existing values in the column are lost.
    RecreateColumn(FieldDefinition),
    DropRelationTable { field: String, target: String },
    CreateRelationTable(FieldDefinition),
}

/// Changes needed to turn `old` into `new`. Removed fields come first, then per-field changes in `new` order.
pub fn plan_changes(old: &[FieldDefinition], new: &[FieldDefinition]) -> Vec<SchemaChange> {
    let mut changes = Vec::new();
    for o in old {
        if new.iter().any(|n| n.name == o.name) {
            continue;
        }
        changes.push(drop_change(o));
    }
    for n in new {
        let Some(o) = old.iter().find(|o| o.name == n.name) else {
            changes.push(add_change(n));
            continue;
        };
        match (o.is_relation(), n.is_relation()) {
            (false, false) => {
                if o.column_changed(n) {
                    changes.push(SchemaChange::RecreateColumn(n.clone()));
                }
            }
            (true, true) => {
                let moved = match (&o.relation, &n.relation) {
                    (Some(a), Some(b)) => a.kind != b.kind || a.target != b.target,
                    _ => true,
                };
                if moved {
                    changes.push(drop_change(o));
                    changes.push(add_change(n));
                }
            }
            _ => {
                changes.push(drop_change(o));
                changes.push(add_change(n));
            }
        }
    }
    changes
}

fn drop_change(field: &FieldDefinition) -> SchemaChange {
    match (&field.relation, field.is_relation()) {
        (Some(rel), true) => SchemaChange::DropRelationTable {
            field: field.name.clone(),
            target: rel.target.clone(),
        },
        _ => SchemaChange::DropColumn(field.name.clone()),
    }
}

fn add_change(field: &FieldDefinition) -> SchemaChange {
    if field.is_relation() {
        SchemaChange::CreateRelationTable(field.clone())
    } else {
        SchemaChange::AddColumn(field.clone())
    }
}

/// Column DDL fragment for a scalar field; None for relation fields.
pub fn column_definition(field: &FieldDefinition) -> Option<String> {
    let ty = field.field_type.ddl_type()?;
    let mut def = format!("{} {}", quoted(&field.name), ty);
    if field.required {
        def.push_str(" NOT NULL");
    }
    if field.unique {
        def.push_str(" UNIQUE");
    }
    Some(def)
}

#[derive(Clone, Debug)]
pub struct SchemaSynchronizer {
    names: TableNames,
    relations: RelationManager,
}

impl SchemaSynchronizer {
    pub fn new(names: TableNames, relations: RelationManager) -> Self {
        SchemaSynchronizer { names, relations }
    }

    /// Create the physical table with base columns and one column per scalar field.
    /// Fails when a table with that name already exists.
    pub async fn create_collection_table(
        &self,
        conn: &mut PgConnection,
        def: &CollectionDefinition,
    ) -> Result<(), CollectionError> {
        let bare = self.names.collection(&def.slug);
        if introspect::table_exists(conn, self.names.schema(), &bare).await? {
            return Err(CollectionError::CollectionAlreadyExists(def.slug.clone()));
        }
        let mut cols = vec![
            r#""id" BIGSERIAL PRIMARY KEY"#.to_string(),
            r#""documentId" UUID NOT NULL UNIQUE"#.to_string(),
            r#""createdAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()"#.to_string(),
            r#""updatedAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()"#.to_string(),
        ];
        cols.extend(def.scalar_fields().filter_map(column_definition));
        let sql = format!("CREATE TABLE {} (\n  {}\n)", self.names.qualified(&bare), cols.join(",\n  "));
        sqlx::query(&sql)
            .execute(&mut *conn)
            .await
            .during("create collection table")?;
        tracing::info!(table = %bare, "collection table created");
        Ok(())
    }

    /// Apply the diff between `old_fields` and `def.fields` to the table named by `def.slug`.
    pub async fn update_collection_table(
        &self,
        conn: &mut PgConnection,
        def: &CollectionDefinition,
        old_fields: &[FieldDefinition],
    ) -> Result<Vec<SchemaChange>, CollectionError> {
        let table = self.names.qualified_collection(&def.slug);
        let changes = plan_changes(old_fields, &def.fields);
        for change in &changes {
            tracing::debug!(table = %table, change = ?change, "schema change");
            match change {
                SchemaChange::DropColumn(name) => self.drop_column(conn, &table, name).await?,
                SchemaChange::AddColumn(field) => self.add_column(conn, &table, field).await?,
                SchemaChange::RecreateColumn(field) => {
                    self.drop_column(conn, &table, &field.name).await?;
                    self.add_column(conn, &table, field).await?;
                }
                SchemaChange::DropRelationTable { field, target } => {
                    self.relations
                        .drop_relation_table(conn, &def.slug, target, field)
                        .await?
                }
                SchemaChange::CreateRelationTable(field) => {
                    self.relations.create_relation_table(conn, def, field).await?
                }
            }
        }
        Ok(changes)
    }

    async fn drop_column(&self, conn: &mut PgConnection, table: &str, name: &str) -> Result<(), CollectionError> {
        sqlx::query(&format!("ALTER TABLE {} DROP COLUMN IF EXISTS {}", table, quoted(name)))
            .execute(&mut *conn)
            .await
            .during("drop column")?;
        Ok(())
    }

    async fn add_column(
        &self,
        conn: &mut PgConnection,
        table: &str,
        field: &FieldDefinition,
    ) -> Result<(), CollectionError> {
        let Some(col) = column_definition(field) else {
            return Ok(());
        };
        sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {}", table, col))
            .execute(&mut *conn)
            .await
            .during("add column")?;
        Ok(())
    }

    pub async fn rename_collection_table(
        &self,
        conn: &mut PgConnection,
        old_slug: &str,
        new_slug: &str,
    ) -> Result<(), CollectionError> {
        sqlx::query(&format!(
            "ALTER TABLE {} RENAME TO {}",
            self.names.qualified_collection(old_slug),
            quoted(&self.names.collection(new_slug))
        ))
        .execute(&mut *conn)
        .await
        .during("rename collection table")?;
        tracing::info!(from = %old_slug, to = %new_slug, "collection table renamed");
        Ok(())
    }

    pub async fn drop_collection_table(&self, conn: &mut PgConnection, slug: &str) -> Result<(), CollectionError> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.names.qualified_collection(slug)))
            .execute(&mut *conn)
            .await
            .during("drop collection table")?;
        tracing::info!(slug = %slug, "collection table dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: serde_json::Value) -> Vec<FieldDefinition> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn column_definition_carries_modifiers() {
        let f = fields(json!([{ "name": "email", "type": "string", "required": true, "unique": true }]));
        assert_eq!(column_definition(&f[0]).unwrap(), "\"email\" VARCHAR(255) NOT NULL UNIQUE");
        let r = fields(json!([{ "name": "r", "type": "relation", "relation": { "type": "oneToOne", "target": "x" } }]));
        assert_eq!(column_definition(&r[0]), None);
    }

    #[test]
    fn plan_drops_first_then_adds_and_recreates() {
        let old = fields(json!([
            { "name": "title", "type": "string" },
            { "name": "legacy", "type": "boolean" },
            { "name": "views", "type": "integer" }
        ]));
        let new = fields(json!([
            { "name": "title", "type": "string", "description": "shown in lists" },
            { "name": "views", "type": "number" },
            { "name": "body", "type": "longtext" }
        ]));
        let plan = plan_changes(&old, &new);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0], SchemaChange::DropColumn("legacy".into()));
        assert!(matches!(&plan[1], SchemaChange::RecreateColumn(f) if f.name == "views"));
        assert!(matches!(&plan[2], SchemaChange::AddColumn(f) if f.name == "body"));
    }

    #[test]
    fn relation_retarget_replaces_join_table() {
        let old = fields(json!([{ "name": "tag", "type": "relation", "relation": { "type": "oneToMany", "target": "tags" } }]));
        let new = fields(json!([{ "name": "tag", "type": "relation", "relation": { "type": "manyToMany", "target": "tags" } }]));
        let plan = plan_changes(&old, &new);
        assert_eq!(
            plan[0],
            SchemaChange::DropRelationTable { field: "tag".into(), target: "tags".into() }
        );
        assert!(matches!(&plan[1], SchemaChange::CreateRelationTable(f) if f.name == "tag"));
    }

    #[test]
    fn scalar_to_relation_swaps_storage() {
        let old = fields(json!([{ "name": "author", "type": "string" }]));
        let new = fields(json!([{ "name": "author", "type": "relation", "relation": { "type": "oneToOne", "target": "authors" } }]));
        let plan = plan_changes(&old, &new);
        assert_eq!(plan[0], SchemaChange::DropColumn("author".into()));
        assert!(matches!(&plan[1], SchemaChange::CreateRelationTable(_)));
    }

    #[test]
    fn identical_fields_need_nothing() {
        let f = fields(json!([{ "name": "title", "type": "string", "required": true }]));
        assert!(plan_changes(&f, &f).is_empty());
    }
}
