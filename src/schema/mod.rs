//! Collection definitions: types, validation, the registry store, and the in-memory index.

mod index;
mod store;
mod types;
pub mod validator;

pub use index::{CollectionIndex, IncomingRelation};
pub use store::SchemaStore;
pub use types::*;
