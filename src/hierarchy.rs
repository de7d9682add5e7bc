//! Parent/child organization of collections: tree views, moves with cycle detection, composed slugs.

use crate::error::CollectionError;
use crate::schema::validator::SLUG_SEPARATOR;
use crate::schema::{CollectionDefinition, CollectionIndex, SchemaStore};
use serde::Serialize;
use sqlx::PgConnection;
use std::collections::{HashMap, HashSet};

/// A collection with its descendants.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionNode {
    #[serde(flatten)]
    pub collection: CollectionDefinition,
    pub children: Vec<CollectionNode>,
}

/// True when making `new_parent` the parent of `id` would close a loop, i.e. `id` is `new_parent`
/// or one of its ancestors. A loop already present among the ancestors also counts.
pub fn would_create_cycle(parents: &HashMap<i64, Option<i64>>, id: i64, new_parent: i64) -> bool {
    let mut visited = HashSet::new();
    let mut current = Some(new_parent);
    while let Some(node) = current {
        if node == id || !visited.insert(node) {
            return true;
        }
        current = parents.get(&node).copied().flatten();
    }
    false
}

/// Build the forest from roots, children ordered by name. Built bottom-up without recursion;
/// collections caught in a parent loop are unreachable from any root and left out.
pub fn build_tree(index: &CollectionIndex) -> Vec<CollectionNode> {
    let mut order = Vec::with_capacity(index.len());
    let mut stack: Vec<i64> = index.child_ids(None).iter().rev().copied().collect();
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        order.push(id);
        stack.extend(index.child_ids(Some(id)).iter().rev().copied());
    }
    let mut built: HashMap<i64, CollectionNode> = HashMap::with_capacity(order.len());
    for id in order.iter().rev() {
        let Some(def) = index.get(*id) else { continue };
        let children = index
            .child_ids(Some(*id))
            .iter()
            .filter_map(|c| built.remove(c))
            .collect();
        built.insert(
            *id,
            CollectionNode {
                collection: def.clone(),
                children,
            },
        );
    }
    index
        .child_ids(None)
        .iter()
        .filter_map(|id| built.remove(id))
        .collect()
}

#[derive(Clone, Debug)]
pub struct HierarchyManager {
    store: SchemaStore,
}

impl HierarchyManager {
    pub fn new(store: SchemaStore) -> Self {
        HierarchyManager { store }
    }

    pub async fn get_collection_hierarchy(
        &self,
        conn: &mut PgConnection,
    ) -> Result<Vec<CollectionNode>, CollectionError> {
        let index = self.store.snapshot(conn).await?;
        Ok(build_tree(&index))
    }

    /// Direct children of `parent_id`; the parent itself must exist.
    pub async fn get_subcollections(
        &self,
        conn: &mut PgConnection,
        parent_id: i64,
    ) -> Result<Vec<CollectionDefinition>, CollectionError> {
        if self.store.find_by_id(conn, parent_id).await?.is_none() {
            return Err(CollectionError::CollectionNotFound(parent_id.to_string()));
        }
        self.store.find_children(conn, parent_id).await
    }

    /// Re-parent a collection, or make it a root with `None`.
    ///
    /// Slugs are not recomposed on move: `a/b/c` moved to the root stays `a/b/c`, and its
    /// table keeps its name.
    pub async fn move_collection(
        &self,
        conn: &mut PgConnection,
        id: i64,
        new_parent_id: Option<i64>,
    ) -> Result<CollectionDefinition, CollectionError> {
        let index = self.store.snapshot(conn).await?;
        if index.get(id).is_none() {
            return Err(CollectionError::CollectionNotFound(id.to_string()));
        }
        if let Some(parent_id) = new_parent_id {
            if index.get(parent_id).is_none() {
                return Err(CollectionError::CollectionNotFound(parent_id.to_string()));
            }
            if would_create_cycle(&index.parents(), id, parent_id) {
                return Err(CollectionError::HierarchyCycle { id, parent_id });
            }
        }
        let moved = self.store.set_parent(conn, id, new_parent_id).await?;
        tracing::info!(id, parent_id = ?new_parent_id, "collection moved");
        Ok(moved)
    }

    /// `<parentSlug>/<slug>` under a parent, or `slug` unchanged for roots.
    pub async fn validate_hierarchical_slug(
        &self,
        conn: &mut PgConnection,
        parent_id: Option<i64>,
        slug: &str,
    ) -> Result<String, CollectionError> {
        let Some(parent_id) = parent_id else {
            return Ok(slug.to_string());
        };
        let parent = self
            .store
            .find_by_id(conn, parent_id)
            .await?
            .ok_or_else(|| CollectionError::CollectionNotFound(parent_id.to_string()))?;
        Ok(compose_slug(&parent.slug, slug))
    }
}

pub fn compose_slug(parent_slug: &str, slug: &str) -> String {
    format!("{}{}{}", parent_slug, SLUG_SEPARATOR, slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CollectionIndex;
    use chrono::Utc;
    use uuid::Uuid;

    fn def(id: i64, name: &str, parent_id: Option<i64>) -> CollectionDefinition {
        CollectionDefinition {
            id,
            document_id: Uuid::new_v4(),
            name: name.into(),
            slug: name.to_lowercase(),
            description: None,
            parent_id,
            fields: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn cycle_detection() {
        // 1 <- 2 <- 3
        let parents = HashMap::from([(1, None), (2, Some(1)), (3, Some(2))]);
        assert!(would_create_cycle(&parents, 1, 3));
        assert!(would_create_cycle(&parents, 2, 2));
        assert!(!would_create_cycle(&parents, 3, 1));
        assert!(!would_create_cycle(&parents, 1, 99));
    }

    #[test]
    fn existing_loop_terminates() {
        let parents = HashMap::from([(1, Some(2)), (2, Some(1)), (3, None)]);
        assert!(would_create_cycle(&parents, 3, 1));
    }

    #[test]
    fn tree_nests_children_sorted_by_name() {
        let index = CollectionIndex::new(vec![
            def(1, "Blog", None),
            def(2, "Posts", Some(1)),
            def(3, "Authors", Some(1)),
            def(4, "Drafts", Some(2)),
            def(5, "About", None),
        ]);
        let tree = build_tree(&index);
        let roots: Vec<&str> = tree.iter().map(|n| n.collection.name.as_str()).collect();
        assert_eq!(roots, ["About", "Blog"]);
        let blog = &tree[1];
        let kids: Vec<&str> = blog.children.iter().map(|n| n.collection.name.as_str()).collect();
        assert_eq!(kids, ["Authors", "Posts"]);
        assert_eq!(blog.children[1].children[0].collection.id, 4);
    }

    #[test]
    fn looped_collections_are_left_out() {
        let index = CollectionIndex::new(vec![def(1, "A", Some(2)), def(2, "B", Some(1)), def(3, "C", None)]);
        let tree = build_tree(&index);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].collection.id, 3);
    }

    #[test]
    fn node_serializes_flat_with_children() {
        let node = CollectionNode {
            collection: def(1, "Blog", None),
            children: vec![],
        };
        let v = serde_json::to_value(&node).unwrap();
        assert_eq!(v["slug"], "blog");
        assert_eq!(v["children"], serde_json::json!([]));
    }

    #[test]
    fn composed_slug() {
        assert_eq!(compose_slug("blog", "posts"), "blog/posts");
    }
}
