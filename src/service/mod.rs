//! Collection and record operations composed over one connection pool.

mod collections;
mod records;
mod validation;

pub use collections::CollectionService;
pub use records::RecordTransactionManager;
pub use validation::{RecordInput, RecordValidator, WriteMode};
