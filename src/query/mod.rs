//! Record querying: filter trees, sorting, page and cursor pagination, relation inclusion.

mod engine;
pub mod filter;
mod options;

pub use engine::QueryEngine;
pub use filter::{Filter, Operator};
pub use options::*;
