//! Entry point composing the registry, schema sync, relations, hierarchy, queries and record writes.

use super::records::RecordTransactionManager;
use super::validation::RecordInput;
use crate::error::{CollectionError, OperationContext};
use crate::hierarchy::{CollectionNode, HierarchyManager};
use crate::query::{QueryEngine, QueryOptions, QueryResult};
use crate::record::Record;
use crate::relations::RelationManager;
use crate::schema::validator::{validate_fields, validate_identifiers, validate_name, validate_slug_segment};
use crate::schema::{CollectionDefinition, CollectionPatch, FieldDefinition, NewCollection, SchemaStore};
use crate::sql::TableNames;
use crate::sync::SchemaSynchronizer;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct CollectionService {
    pool: PgPool,
    names: TableNames,
    store: SchemaStore,
    relations: RelationManager,
    sync: SchemaSynchronizer,
    hierarchy: HierarchyManager,
    query: QueryEngine,
    records: RecordTransactionManager,
}

/// Point relation targets at `new` wherever they name `old`.
fn retarget(fields: &mut [FieldDefinition], old: &str, new: &str) {
    for rel in fields.iter_mut().filter_map(|f| f.relation.as_mut()) {
        if rel.target == old {
            rel.target = new.to_string();
        }
    }
}

impl CollectionService {
    pub fn new(pool: PgPool, names: TableNames) -> Self {
        let store = SchemaStore::new(names.clone());
        let relations = RelationManager::new(names.clone());
        CollectionService {
            sync: SchemaSynchronizer::new(names.clone(), relations.clone()),
            hierarchy: HierarchyManager::new(store.clone()),
            query: QueryEngine::new(names.clone()),
            records: RecordTransactionManager::new(names.clone(), relations.clone()),
            pool,
            names,
            store,
            relations,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table_names(&self) -> &TableNames {
        &self.names
    }

    /// Create the schema and registry table. Call once at startup.
    pub async fn ensure_registry(&self) -> Result<(), CollectionError> {
        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        self.store.ensure_registry(&mut conn).await
    }

    pub async fn find_all(&self) -> Result<Vec<CollectionDefinition>, CollectionError> {
        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        self.store.find_all(&mut conn).await
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<CollectionDefinition>, CollectionError> {
        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        self.store.find_by_id(&mut conn, id).await
    }

    pub async fn find_by_document_id(&self, document_id: Uuid) -> Result<Option<CollectionDefinition>, CollectionError> {
        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        self.store.find_by_document_id(&mut conn, document_id).await
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<CollectionDefinition>, CollectionError> {
        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        self.store.find_by_slug(&mut conn, slug).await
    }

    async fn require_by_slug(&self, slug: &str) -> Result<CollectionDefinition, CollectionError> {
        self.find_by_slug(slug)
            .await?
            .ok_or_else(|| CollectionError::CollectionNotFound(slug.to_string()))
    }

    /// Validate, then register the collection and create its table and join tables in one transaction.
    pub async fn create(&self, input: NewCollection) -> Result<CollectionDefinition, CollectionError> {
        validate_name(&input.name)?;
        validate_slug_segment(&input.slug)?;
        validate_fields(&input.fields)?;

        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        let slug = self
            .hierarchy
            .validate_hierarchical_slug(&mut conn, input.parent_id, &input.slug)
            .await?;
        let index = self.store.snapshot(&mut conn).await?;
        drop(conn);
        if index.by_slug(&slug).is_some() {
            return Err(CollectionError::CollectionAlreadyExists(slug));
        }
        let now = Utc::now();
        let draft = CollectionDefinition {
            id: 0,
            document_id: Uuid::nil(),
            name: input.name.clone(),
            slug: slug.clone(),
            description: input.description.clone(),
            parent_id: input.parent_id,
            fields: input.fields.clone(),
            created_at: now,
            updated_at: now,
        };
        RelationManager::validate_relations(&draft, &index)?;
        validate_identifiers(&self.names, &draft)?;

        let input = NewCollection { slug, ..input };
        let mut tx = self.pool.begin().await.during("begin transaction")?;
        let created = self.store.create(&mut tx, &input).await?;
        if let Err(e) = self.sync.create_collection_table(&mut tx, &created).await {
            if matches!(e, CollectionError::CollectionAlreadyExists(_)) {
                tracing::warn!(slug = %created.slug, "physical table exists without a registry entry");
            }
            return Err(e);
        }
        for (field, _) in created.relation_fields() {
            self.relations.create_relation_table(&mut tx, &created, field).await?;
        }
        tx.commit().await.during("commit collection")?;
        tracing::info!(id = created.id, slug = %created.slug, "collection created");
        Ok(created)
    }

    /// Rename, re-describe, or change the fields of a collection. Schema changes and the registry
    /// update share one transaction.
    pub async fn update(&self, id: i64, patch: CollectionPatch) -> Result<CollectionDefinition, CollectionError> {
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        if let Some(fields) = &patch.fields {
            validate_fields(fields)?;
        }
        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        let index = self.store.snapshot(&mut conn).await?;
        let existing = index
            .get(id)
            .cloned()
            .ok_or_else(|| CollectionError::CollectionNotFound(id.to_string()))?;

        let new_slug = match patch.slug.as_deref() {
            None => None,
            Some(s) if s == existing.slug => None,
            Some(leaf) => {
                validate_slug_segment(leaf)?;
                let composed = self
                    .hierarchy
                    .validate_hierarchical_slug(&mut conn, existing.parent_id, leaf)
                    .await?;
                Some(composed).filter(|s| *s != existing.slug)
            }
        };
        drop(conn);

        if let Some(slug) = &new_slug {
            if index.by_slug(slug).is_some_and(|c| c.id != id) {
                return Err(CollectionError::CollectionAlreadyExists(slug.clone()));
            }
            let incoming = index.incoming(&existing.slug);
            if let Some(first) = incoming.first() {
                tracing::warn!(slug = %existing.slug, source = %first.source_slug, "slug change refused");
                return Err(CollectionError::field_validation(
                    "slug",
                    format!(
                        "slug of \"{}\" cannot change while \"{}.{}\" relates to it",
                        existing.slug, first.source_slug, first.field
                    ),
                ));
            }
            if !index.child_ids(Some(id)).is_empty() {
                return Err(CollectionError::field_validation(
                    "slug",
                    format!("slug of \"{}\" cannot change while it has subcollections", existing.slug),
                ));
            }
        }

        let slug = new_slug.clone().unwrap_or_else(|| existing.slug.clone());
        let mut old_fields = existing.fields.clone();
        let mut new_fields = patch.fields.clone();
        if let Some(s) = &new_slug {
            retarget(&mut old_fields, &existing.slug, s);
            if let Some(f) = new_fields.as_mut() {
                retarget(f, &existing.slug, s);
            }
        }
        let draft = CollectionDefinition {
            name: patch.name.clone().unwrap_or_else(|| existing.name.clone()),
            slug: slug.clone(),
            fields: new_fields.clone().unwrap_or_else(|| old_fields.clone()),
            ..existing.clone()
        };
        if new_fields.is_some() {
            RelationManager::validate_relations(&draft, &index)?;
        }
        validate_identifiers(&self.names, &draft)?;

        let mut tx = self.pool.begin().await.during("begin transaction")?;
        if let Some(s) = &new_slug {
            self.sync.rename_collection_table(&mut tx, &existing.slug, s).await?;
            for (field, rel) in existing.relation_fields() {
                let new_target = if rel.target == existing.slug { s.as_str() } else { rel.target.as_str() };
                self.relations
                    .rename_relation_table(
                        &mut tx,
                        (existing.slug.as_str(), rel.target.as_str()),
                        (s.as_str(), new_target),
                        &field.name,
                    )
                    .await?;
            }
        }
        if new_fields.is_some() {
            self.sync.update_collection_table(&mut tx, &draft, &old_fields).await?;
        }
        let stored = CollectionPatch {
            name: patch.name,
            slug: new_slug.clone(),
            description: patch.description,
            fields: if new_slug.is_some() { Some(draft.fields.clone()) } else { new_fields },
        };
        let updated = self.store.update(&mut tx, id, &stored).await?;
        tx.commit().await.during("commit collection")?;
        tracing::info!(id, slug = %updated.slug, "collection updated");
        Ok(updated)
    }

    /// Drop join tables, the physical table, then the registry row. Refused while other collections relate to it.
    pub async fn delete(&self, id: i64) -> Result<(), CollectionError> {
        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        let index = self.store.snapshot(&mut conn).await?;
        drop(conn);
        let def = index
            .get(id)
            .ok_or_else(|| CollectionError::CollectionNotFound(id.to_string()))?;
        if let Some(first) = index.incoming(&def.slug).first() {
            tracing::warn!(slug = %def.slug, source = %first.source_slug, "collection delete refused");
            return Err(CollectionError::field_validation(
                "slug",
                format!(
                    "collection \"{}\" is referenced by \"{}.{}\" and cannot be deleted",
                    def.slug, first.source_slug, first.field
                ),
            ));
        }

        let mut tx = self.pool.begin().await.during("begin transaction")?;
        for (field, rel) in def.relation_fields() {
            self.relations
                .drop_relation_table(&mut tx, &def.slug, &rel.target, &field.name)
                .await?;
        }
        self.sync.drop_collection_table(&mut tx, &def.slug).await?;
        self.store.delete(&mut tx, id).await?;
        tx.commit().await.during("commit collection")?;
        tracing::info!(id, slug = %def.slug, "collection deleted");
        Ok(())
    }

    pub async fn get_collection_hierarchy(&self) -> Result<Vec<CollectionNode>, CollectionError> {
        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        self.hierarchy.get_collection_hierarchy(&mut conn).await
    }

    pub async fn get_subcollections(&self, parent_id: i64) -> Result<Vec<CollectionDefinition>, CollectionError> {
        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        self.hierarchy.get_subcollections(&mut conn, parent_id).await
    }

    pub async fn move_collection(
        &self,
        id: i64,
        new_parent_id: Option<i64>,
    ) -> Result<CollectionDefinition, CollectionError> {
        let mut tx = self.pool.begin().await.during("begin transaction")?;
        let moved = self.hierarchy.move_collection(&mut tx, id, new_parent_id).await?;
        tx.commit().await.during("commit collection")?;
        Ok(moved)
    }

    pub async fn list_records(&self, slug: &str, options: &QueryOptions) -> Result<QueryResult, CollectionError> {
        let def = self.require_by_slug(slug).await?;
        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        self.query.execute(&mut conn, &def, options).await
    }

    pub async fn get_record(
        &self,
        slug: &str,
        document_id: Uuid,
        include_relations: bool,
    ) -> Result<Record, CollectionError> {
        let def = self.require_by_slug(slug).await?;
        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        self.query
            .find_one(&mut conn, &def, document_id, include_relations)
            .await?
            .ok_or_else(|| CollectionError::record_not_found(document_id, &def.slug))
    }

    pub async fn create_record(&self, slug: &str, input: &RecordInput) -> Result<Record, CollectionError> {
        let def = self.require_by_slug(slug).await?;
        self.records.create_record(&self.pool, &def, input).await
    }

    pub async fn update_record(
        &self,
        slug: &str,
        document_id: Uuid,
        input: &RecordInput,
    ) -> Result<Record, CollectionError> {
        let def = self.require_by_slug(slug).await?;
        self.records.update_record(&self.pool, &def, document_id, input).await
    }

    pub async fn delete_record(&self, slug: &str, document_id: Uuid) -> Result<(), CollectionError> {
        let def = self.require_by_slug(slug).await?;
        self.records.delete_record(&self.pool, &def, document_id).await
    }

    /// Target documentIds linked from one record through one relation field.
    pub async fn related_ids(
        &self,
        slug: &str,
        document_id: Uuid,
        field: &str,
    ) -> Result<Vec<Uuid>, CollectionError> {
        let def = self.require_by_slug(slug).await?;
        let field_def = def
            .relation_fields()
            .map(|(f, _)| f)
            .find(|f| f.name == field)
            .ok_or_else(|| {
                CollectionError::field_validation(
                    field,
                    format!("\"{}\" is not a relation field of collection \"{}\"", field, def.slug),
                )
            })?;
        let mut conn = self.pool.acquire().await.during("acquire connection")?;
        self.relations
            .related_ids(&mut conn, &def.slug, field_def, document_id)
            .await
    }
}
