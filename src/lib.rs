//! Collections SDK: runtime-defined content collections stored in PostgreSQL.
//!
//! Collection definitions live in a registry table; each collection gets a physical table and
//! one join table per relation field. [`CollectionService`] is the entry point; [`routes::router`]
//! exposes it over HTTP.

pub mod database;
pub mod error;
pub mod handlers;
pub mod hierarchy;
pub mod query;
pub mod record;
pub mod relations;
pub mod response;
pub mod routes;
pub mod schema;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod sync;

pub use database::{connect, ensure_database_exists};
pub use error::{AppError, CollectionError, ConfigError};
pub use hierarchy::{CollectionNode, HierarchyManager};
pub use query::{Filter, Pagination, PaginationMeta, QueryEngine, QueryOptions, QueryResult};
pub use record::Record;
pub use relations::RelationManager;
pub use routes::router;
pub use schema::{CollectionDefinition, CollectionPatch, FieldDefinition, FieldType, NewCollection, SchemaStore};
pub use service::{CollectionService, RecordInput, RecordTransactionManager};
pub use settings::Settings;
pub use sql::TableNames;
pub use state::AppState;
pub use sync::SchemaSynchronizer;
