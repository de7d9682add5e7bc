//! Identifier quoting and the deterministic table-naming scheme.
//! Every identifier that reaches SQL text goes through [`quoted`]; values never do.

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Registry table for collection definitions.
pub const REGISTRY_TABLE: &str = "_sys_collections";

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Schema and prefix under which every physical table lives.
#[derive(Clone, Debug)]
pub struct TableNames {
    schema: String,
    prefix: String,
}

impl TableNames {
    pub fn new(schema: impl Into<String>, prefix: impl Into<String>) -> Self {
        TableNames {
            schema: schema.into(),
            prefix: prefix.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// `<prefix>_<slug>`
    pub fn collection(&self, slug: &str) -> String {
        format!("{}_{}", self.prefix, slug)
    }

    /// `<prefix>_rel_<sourceSlug>_<targetSlug>_<fieldName>`
    pub fn relation(&self, source_slug: &str, target_slug: &str, field: &str) -> String {
        format!("{}_rel_{}_{}_{}", self.prefix, source_slug, target_slug, field)
    }

    /// Schema-qualified, quoted form of a bare table name.
    pub fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quoted(&self.schema), quoted(table))
    }

    pub fn registry(&self) -> String {
        self.qualified(REGISTRY_TABLE)
    }

    pub fn qualified_collection(&self, slug: &str) -> String {
        self.qualified(&self.collection(slug))
    }

    pub fn qualified_relation(&self, source_slug: &str, target_slug: &str, field: &str) -> String {
        self.qualified(&self.relation(source_slug, target_slug, field))
    }
}
