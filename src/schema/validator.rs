//! Shape validation of collection definitions: names, slugs, fields, and identifier lengths.

use super::types::{CollectionDefinition, FieldDefinition};
use crate::error::CollectionError;
use crate::sql::{TableNames, MAX_IDENTIFIER_BYTES};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Field names owned by every collection table.
pub const RESERVED_FIELD_NAMES: [&str; 4] = ["id", "documentId", "createdAt", "updatedAt"];

/// Separator between parent and child slug segments.
pub const SLUG_SEPARATOR: char = '/';

fn slug_pattern() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("slug pattern is valid"))
}

fn field_name_pattern() -> &'static Regex {
    static FIELD: OnceLock<Regex> = OnceLock::new();
    FIELD.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("field name pattern is valid"))
}

pub fn validate_name(name: &str) -> Result<(), CollectionError> {
    if name.trim().is_empty() {
        return Err(CollectionError::field_validation("name", "Collection name is required"));
    }
    Ok(())
}

/// A single slug segment as supplied by callers (no separator).
pub fn validate_slug_segment(slug: &str) -> Result<(), CollectionError> {
    if slug.is_empty() {
        return Err(CollectionError::field_validation("slug", "Collection slug is required"));
    }
    if !slug_pattern().is_match(slug) {
        return Err(CollectionError::field_validation(
            "slug",
            format!(
                "slug \"{}\" must start with a lowercase letter or digit and contain only lowercase letters, digits, '-' or '_'",
                slug
            ),
        ));
    }
    Ok(())
}

/// A composed slug: one or more valid segments joined by `/`.
pub fn validate_slug_path(slug: &str) -> Result<(), CollectionError> {
    if slug.is_empty() {
        return Err(CollectionError::field_validation("slug", "Collection slug is required"));
    }
    slug.split(SLUG_SEPARATOR).try_for_each(validate_slug_segment)
}

pub fn validate_fields(fields: &[FieldDefinition]) -> Result<(), CollectionError> {
    let mut seen = HashSet::new();
    for f in fields {
        if !field_name_pattern().is_match(&f.name) {
            return Err(CollectionError::field_validation(
                &f.name,
                format!("field name \"{}\" must start with a letter and contain only letters, digits or '_'", f.name),
            ));
        }
        if RESERVED_FIELD_NAMES.contains(&f.name.as_str()) {
            return Err(CollectionError::field_validation(
                &f.name,
                format!("field name \"{}\" is reserved", f.name),
            ));
        }
        if !seen.insert(f.name.as_str()) {
            return Err(CollectionError::field_validation(
                &f.name,
                format!("field \"{}\" is defined more than once", f.name),
            ));
        }
        match (&f.relation, f.is_relation()) {
            (None, true) => {
                return Err(CollectionError::field_validation(
                    &f.name,
                    format!("relation field \"{}\" requires a relation config", f.name),
                ))
            }
            (Some(_), false) => {
                return Err(CollectionError::field_validation(
                    &f.name,
                    format!("field \"{}\" is not a relation but has a relation config", f.name),
                ))
            }
            (Some(rel), true) if rel.target.is_empty() => {
                return Err(CollectionError::field_validation(
                    &f.name,
                    format!("relation field \"{}\" requires a target", f.name),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Every physical identifier the definition implies must fit PostgreSQL's limit; longer ones would be silently truncated.
pub fn validate_identifiers(names: &TableNames, def: &CollectionDefinition) -> Result<(), CollectionError> {
    let check = |ident: String, field: Option<&str>| {
        if ident.len() > MAX_IDENTIFIER_BYTES {
            let message = format!(
                "identifier \"{}\" exceeds {} bytes; use a shorter slug or field name",
                ident, MAX_IDENTIFIER_BYTES
            );
            return Err(match field {
                Some(f) => CollectionError::field_validation(f, message),
                None => CollectionError::field_validation("slug", message),
            });
        }
        Ok(())
    };
    check(names.collection(&def.slug), None)?;
    for f in &def.fields {
        check(f.name.clone(), Some(&f.name))?;
    }
    for (field, rel) in def.relation_fields() {
        check(names.relation(&def.slug, &rel.target, &field.name), Some(&field.name))?;
    }
    Ok(())
}
