//! Runtime settings read from the environment.

use crate::error::ConfigError;
use crate::sql::TableNames;
use regex::Regex;
use std::sync::OnceLock;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/collections";
const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_TABLE_PREFIX: &str = "cm";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    /// PostgreSQL schema holding the registry, collection and join tables.
    pub schema: String,
    pub table_prefix: String,
    pub max_connections: u32,
    pub bind_addr: String,
}

fn identifier_pattern() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("identifier pattern is valid"))
}

fn check_identifier(key: &'static str, value: &str) -> Result<(), ConfigError> {
    if identifier_pattern().is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            message: format!("\"{}\" must be a lowercase identifier", value),
        })
    }
}

impl Settings {
    /// Load `.env` if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let schema = get("COLLECTIONS_SCHEMA", DEFAULT_SCHEMA);
        check_identifier("COLLECTIONS_SCHEMA", &schema)?;
        let table_prefix = get("COLLECTIONS_TABLE_PREFIX", DEFAULT_TABLE_PREFIX);
        check_identifier("COLLECTIONS_TABLE_PREFIX", &table_prefix)?;
        let max_connections = match lookup("COLLECTIONS_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::Invalid {
                    key: "COLLECTIONS_MAX_CONNECTIONS",
                    message: format!("\"{}\" is not a positive integer", raw),
                })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        Ok(Settings {
            database_url: get("DATABASE_URL", DEFAULT_DATABASE_URL),
            schema,
            table_prefix,
            max_connections,
            bind_addr: get("COLLECTIONS_BIND_ADDR", DEFAULT_BIND_ADDR),
        })
    }

    pub fn table_names(&self) -> TableNames {
        TableNames::new(&self.schema, &self.table_prefix)
    }
}
