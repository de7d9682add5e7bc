//! Registry table DDL and persistence of collection definitions.

use super::index::CollectionIndex;
use super::types::{CollectionDefinition, CollectionPatch, FieldDefinition, NewCollection};
use super::validator::{validate_fields, validate_name, validate_slug_path};
use crate::error::{CollectionError, OperationContext};
use crate::sql::{quoted, TableNames};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

const SELECT_COLUMNS: &str =
    r#""id", "documentId", "name", "slug", "description", "fields", "parentId", "createdAt", "updatedAt""#;

#[derive(sqlx::FromRow)]
#[sqlx(rename_all = "camelCase")]
struct CollectionRow {
    id: i64,
    document_id: Uuid,
    name: String,
    slug: String,
    description: Option<String>,
    fields: serde_json::Value,
    parent_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CollectionRow> for CollectionDefinition {
    type Error = CollectionError;

    fn try_from(row: CollectionRow) -> Result<Self, Self::Error> {
        let fields: Vec<FieldDefinition> = serde_json::from_value(row.fields).map_err(|e| {
            CollectionError::field_validation(
                "fields",
                format!("stored fields of collection \"{}\" are malformed: {}", row.slug, e),
            )
        })?;
        Ok(CollectionDefinition {
            id: row.id,
            document_id: row.document_id,
            name: row.name,
            slug: row.slug,
            description: row.description,
            parent_id: row.parent_id,
            fields,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn fields_json(fields: &[FieldDefinition]) -> Result<serde_json::Value, CollectionError> {
    serde_json::to_value(fields)
        .map_err(|e| CollectionError::field_validation("fields", format!("fields are not serializable: {}", e)))
}

/// Persists collection definitions in the registry table. Every method runs on the caller's connection
/// so schema changes and registry writes share one transaction.
#[derive(Clone, Debug)]
pub struct SchemaStore {
    names: TableNames,
}

impl SchemaStore {
    pub fn new(names: TableNames) -> Self {
        SchemaStore { names }
    }

    /// Create the schema and registry table if they do not exist.
    pub async fn ensure_registry(&self, conn: &mut PgConnection) -> Result<(), CollectionError> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(self.names.schema())))
            .execute(&mut *conn)
            .await
            .during("create schema")?;
        let registry = self.names.registry();
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {registry} (
                "id" BIGSERIAL PRIMARY KEY,
                "documentId" UUID NOT NULL UNIQUE,
                "name" TEXT NOT NULL,
                "slug" TEXT NOT NULL UNIQUE,
                "description" TEXT,
                "fields" JSONB NOT NULL DEFAULT '[]'::jsonb,
                "parentId" BIGINT REFERENCES {registry} ("id") ON DELETE SET NULL,
                "createdAt" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                "updatedAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        );
        sqlx::query(&ddl).execute(&mut *conn).await.during("create registry table")?;
        sqlx::query(&format!(
            r#"CREATE INDEX IF NOT EXISTS "_sys_collections_parentId_idx" ON {} ("parentId")"#,
            registry
        ))
        .execute(&mut *conn)
        .await
        .during("create registry index")?;
        Ok(())
    }

    /// Insert a definition. `input.slug` is the full composed slug.
    pub async fn create(
        &self,
        conn: &mut PgConnection,
        input: &NewCollection,
    ) -> Result<CollectionDefinition, CollectionError> {
        validate_name(&input.name)?;
        validate_slug_path(&input.slug)?;
        validate_fields(&input.fields)?;
        if self.find_by_slug(conn, &input.slug).await?.is_some() {
            return Err(CollectionError::CollectionAlreadyExists(input.slug.clone()));
        }
        let sql = format!(
            r#"INSERT INTO {} ("documentId", "name", "slug", "description", "fields", "parentId")
               VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}"#,
            self.names.registry(),
            SELECT_COLUMNS
        );
        let row: CollectionRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(&input.name)
            .bind(&input.slug)
            .bind(&input.description)
            .bind(fields_json(&input.fields)?)
            .bind(input.parent_id)
            .fetch_one(&mut *conn)
            .await
            .during("create collection")
            .map_err(|e| slug_conflict(e, &input.slug))?;
        row.try_into()
    }

    /// Apply a partial update. `patch.slug`, when set, is the full composed slug.
    pub async fn update(
        &self,
        conn: &mut PgConnection,
        id: i64,
        patch: &CollectionPatch,
    ) -> Result<CollectionDefinition, CollectionError> {
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        if let Some(slug) = &patch.slug {
            validate_slug_path(slug)?;
            if let Some(other) = self.find_by_slug(conn, slug).await? {
                if other.id != id {
                    return Err(CollectionError::CollectionAlreadyExists(slug.clone()));
                }
            }
        }
        let fields = match &patch.fields {
            Some(f) => {
                validate_fields(f)?;
                Some(fields_json(f)?)
            }
            None => None,
        };
        let sql = format!(
            r#"UPDATE {} SET
                 "name" = COALESCE($2, "name"),
                 "slug" = COALESCE($3, "slug"),
                 "description" = COALESCE($4, "description"),
                 "fields" = COALESCE($5, "fields"),
                 "updatedAt" = NOW()
               WHERE "id" = $1 RETURNING {}"#,
            self.names.registry(),
            SELECT_COLUMNS
        );
        let row: Option<CollectionRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(&patch.name)
            .bind(&patch.slug)
            .bind(&patch.description)
            .bind(fields)
            .fetch_optional(&mut *conn)
            .await
            .during("update collection")
            .map_err(|e| slug_conflict(e, patch.slug.as_deref().unwrap_or_default()))?;
        row.ok_or_else(|| CollectionError::CollectionNotFound(id.to_string()))?
            .try_into()
    }

    pub async fn set_parent(
        &self,
        conn: &mut PgConnection,
        id: i64,
        parent_id: Option<i64>,
    ) -> Result<CollectionDefinition, CollectionError> {
        let sql = format!(
            r#"UPDATE {} SET "parentId" = $2, "updatedAt" = NOW() WHERE "id" = $1 RETURNING {}"#,
            self.names.registry(),
            SELECT_COLUMNS
        );
        let row: Option<CollectionRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(parent_id)
            .fetch_optional(&mut *conn)
            .await
            .during("move collection")?;
        row.ok_or_else(|| CollectionError::CollectionNotFound(id.to_string()))?
            .try_into()
    }

    pub async fn delete(&self, conn: &mut PgConnection, id: i64) -> Result<(), CollectionError> {
        let result = sqlx::query(&format!(r#"DELETE FROM {} WHERE "id" = $1"#, self.names.registry()))
            .bind(id)
            .execute(&mut *conn)
            .await
            .during("delete collection")?;
        if result.rows_affected() == 0 {
            return Err(CollectionError::CollectionNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn find_by_id(
        &self,
        conn: &mut PgConnection,
        id: i64,
    ) -> Result<Option<CollectionDefinition>, CollectionError> {
        self.find_one(conn, r#""id" = $1"#, id, "find collection by id").await
    }

    pub async fn find_by_document_id(
        &self,
        conn: &mut PgConnection,
        document_id: Uuid,
    ) -> Result<Option<CollectionDefinition>, CollectionError> {
        self.find_one(conn, r#""documentId" = $1"#, document_id, "find collection by documentId")
            .await
    }

    pub async fn find_by_slug(
        &self,
        conn: &mut PgConnection,
        slug: &str,
    ) -> Result<Option<CollectionDefinition>, CollectionError> {
        self.find_one(conn, r#""slug" = $1"#, slug.to_string(), "find collection by slug").await
    }

    async fn find_one<T>(
        &self,
        conn: &mut PgConnection,
        condition: &str,
        key: T,
        operation: &'static str,
    ) -> Result<Option<CollectionDefinition>, CollectionError>
    where
        T: for<'q> sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + Send + 'static,
    {
        let sql = format!("SELECT {} FROM {} WHERE {}", SELECT_COLUMNS, self.names.registry(), condition);
        let row: Option<CollectionRow> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await
            .during(operation)?;
        row.map(CollectionDefinition::try_from).transpose()
    }

    pub async fn find_all(&self, conn: &mut PgConnection) -> Result<Vec<CollectionDefinition>, CollectionError> {
        let sql = format!(r#"SELECT {} FROM {} ORDER BY "id""#, SELECT_COLUMNS, self.names.registry());
        let rows: Vec<CollectionRow> = sqlx::query_as(&sql)
            .fetch_all(&mut *conn)
            .await
            .during("list collections")?;
        rows.into_iter().map(CollectionDefinition::try_from).collect()
    }

    /// Direct children of a collection, ordered by name.
    pub async fn find_children(
        &self,
        conn: &mut PgConnection,
        parent_id: i64,
    ) -> Result<Vec<CollectionDefinition>, CollectionError> {
        let sql = format!(
            r#"SELECT {} FROM {} WHERE "parentId" = $1 ORDER BY "name", "id""#,
            SELECT_COLUMNS,
            self.names.registry()
        );
        let rows: Vec<CollectionRow> = sqlx::query_as(&sql)
            .bind(parent_id)
            .fetch_all(&mut *conn)
            .await
            .during("list subcollections")?;
        rows.into_iter().map(CollectionDefinition::try_from).collect()
    }

    /// Load every definition into a [`CollectionIndex`].
    pub async fn snapshot(&self, conn: &mut PgConnection) -> Result<CollectionIndex, CollectionError> {
        Ok(CollectionIndex::new(self.find_all(conn).await?))
    }
}

/// A unique violation on the slug column means another writer registered the same slug first.
fn slug_conflict(err: CollectionError, slug: &str) -> CollectionError {
    match err {
        CollectionError::DuplicateFieldValue { field, .. } if field == "slug" => {
            CollectionError::CollectionAlreadyExists(slug.to_string())
        }
        other => other,
    }
}
