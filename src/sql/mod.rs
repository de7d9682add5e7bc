//! Safe SQL building: identifiers are always quoted, values always bound as parameters.

mod builder;
pub mod ident;
pub mod introspect;
pub mod params;
pub use builder::*;
pub use ident::{quoted, TableNames, MAX_IDENTIFIER_BYTES, REGISTRY_TABLE};
pub use params::*;
