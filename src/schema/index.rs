//! In-memory snapshot of all collection definitions: lookups by id and slug, parent links, relation adjacency.

use super::types::{CollectionDefinition, RelationConfig};
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct CollectionIndex {
    by_id: HashMap<i64, CollectionDefinition>,
    id_by_slug: HashMap<String, i64>,
    children: HashMap<Option<i64>, Vec<i64>>,
}

/// A relation field on another collection that points at the indexed one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingRelation {
    pub source_slug: String,
    pub field: String,
}

impl CollectionIndex {
    pub fn new(defs: Vec<CollectionDefinition>) -> Self {
        let mut index = CollectionIndex::default();
        for def in defs {
            index.id_by_slug.insert(def.slug.clone(), def.id);
            index.by_id.insert(def.id, def);
        }
        // A parent id that no longer resolves is treated as root.
        let mut children: HashMap<Option<i64>, Vec<&CollectionDefinition>> = HashMap::new();
        for def in index.by_id.values() {
            let parent = def.parent_id.filter(|p| index.by_id.contains_key(p));
            children.entry(parent).or_default().push(def);
        }
        index.children = children
            .into_iter()
            .map(|(parent, mut defs)| {
                defs.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
                (parent, defs.into_iter().map(|d| d.id).collect())
            })
            .collect();
        index
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn get(&self, id: i64) -> Option<&CollectionDefinition> {
        self.by_id.get(&id)
    }

    pub fn by_slug(&self, slug: &str) -> Option<&CollectionDefinition> {
        self.id_by_slug.get(slug).and_then(|id| self.by_id.get(id))
    }

    /// Child ids of `parent` (None for roots), ordered by name.
    pub fn child_ids(&self, parent: Option<i64>) -> &[i64] {
        self.children.get(&parent).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parent link per collection id.
    pub fn parents(&self) -> HashMap<i64, Option<i64>> {
        self.by_id.iter().map(|(id, def)| (*id, def.parent_id)).collect()
    }

    /// Outgoing relation edges keyed by source slug.
    pub fn relation_graph(&self) -> HashMap<&str, Vec<(&str, &RelationConfig)>> {
        self.by_id
            .values()
            .map(|def| {
                let edges = def
                    .relation_fields()
                    .map(|(f, r)| (f.name.as_str(), r))
                    .collect();
                (def.slug.as_str(), edges)
            })
            .collect()
    }

    /// Relation fields on other collections targeting `slug`. Self-relations are excluded.
    pub fn incoming(&self, slug: &str) -> Vec<IncomingRelation> {
        let mut incoming: Vec<IncomingRelation> = self
            .relation_graph()
            .into_iter()
            .filter(|(source, _)| *source != slug)
            .flat_map(|(source, edges)| {
                edges
                    .into_iter()
                    .filter(|(_, rel)| rel.target == slug)
                    .map(move |(field, _)| IncomingRelation {
                        source_slug: source.to_string(),
                        field: field.to_string(),
                    })
            })
            .collect();
        incoming.sort_by(|a, b| a.source_slug.cmp(&b.source_slug).then(a.field.cmp(&b.field)));
        incoming
    }
}
