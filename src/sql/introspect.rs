//! Catalog lookups against information_schema.

use crate::error::{CollectionError, OperationContext};
use sqlx::PgConnection;

pub async fn table_exists(conn: &mut PgConnection, schema: &str, table: &str) -> Result<bool, CollectionError> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2)",
    )
    .bind(schema)
    .bind(table)
    .fetch_one(&mut *conn)
    .await
    .during("check table exists")
}

/// Column names of a table in ordinal order; empty when the table does not exist.
pub async fn column_names(conn: &mut PgConnection, schema: &str, table: &str) -> Result<Vec<String>, CollectionError> {
    sqlx::query_scalar::<_, String>(
        "SELECT column_name::text FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(&mut *conn)
    .await
    .during("list table columns")
}
