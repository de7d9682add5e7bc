//! Database bootstrap: create the target database when missing and open the pool.

use crate::error::{AppError, ConfigError, OperationContext};
use crate::settings::Settings;
use crate::sql::quoted;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgConnection, PgPool};
use std::str::FromStr;

/// Connect to the `postgres` maintenance database and `CREATE DATABASE` the one named in the URL if absent.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = PgConnectOptions::from_str(&admin_url).map_err(|e| ConfigError::Invalid {
        key: "DATABASE_URL",
        message: e.to_string(),
    })?;
    let mut conn: PgConnection = opts.connect().await.during("connect to maintenance database")?;
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await
        .during("check database")?;
    if !exists {
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&db_name)))
            .execute(&mut conn)
            .await
            .during("create database")?;
        tracing::info!(database = %db_name, "database created");
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), ConfigError> {
    let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
    let path_start = url
        .get(scheme_end..)
        .and_then(|rest| rest.find('/'))
        .map(|i| scheme_end + i + 1)
        .ok_or_else(|| ConfigError::Invalid {
            key: "DATABASE_URL",
            message: "no database path".into(),
        })?;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let mut parts = path_and_query.splitn(2, '?');
    let db_name = parts.next().unwrap_or("").trim().to_string();
    let query = parts.next().map(|q| format!("?{}", q)).unwrap_or_default();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres{}", base, query), db_name))
}

pub async fn connect(settings: &Settings) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .during("connect")?;
    Ok(pool)
}
