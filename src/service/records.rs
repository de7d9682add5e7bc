//! Transactional record writes: base row and join rows commit or roll back together.

use super::validation::{RecordInput, RecordValidator, WriteMode};
use crate::error::{CollectionError, OperationContext};
use crate::record::Record;
use crate::relations::RelationManager;
use crate::schema::CollectionDefinition;
use crate::sql::{delete_record, insert_record, lock_record, unique_probe, update_record, ColumnValue, TableNames};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct RecordTransactionManager {
    names: TableNames,
    relations: RelationManager,
}

impl RecordTransactionManager {
    pub fn new(names: TableNames, relations: RelationManager) -> Self {
        RecordTransactionManager { names, relations }
    }

    /// Report the first unique field whose value is already taken. The unique constraint still decides under races.
    async fn check_unique(
        &self,
        conn: &mut PgConnection,
        def: &CollectionDefinition,
        values: &[ColumnValue<'_>],
        exclude: Option<Uuid>,
    ) -> Result<(), CollectionError> {
        for (name, kind, value) in values {
            let unique = def.field(name).is_some_and(|f| f.unique);
            if !unique || value.is_null() {
                continue;
            }
            let q = unique_probe(&self.names, def, name, *kind, value.clone(), exclude);
            let taken = q
                .query()
                .fetch_optional(&mut *conn)
                .await
                .during("check unique value")?
                .is_some();
            if taken {
                return Err(CollectionError::DuplicateFieldValue {
                    field: name.to_string(),
                    value: value.to_json().to_string(),
                });
            }
        }
        Ok(())
    }

    async fn lock(
        &self,
        conn: &mut PgConnection,
        def: &CollectionDefinition,
        document_id: Uuid,
    ) -> Result<(), CollectionError> {
        lock_record(&self.names, def, document_id)
            .query()
            .fetch_optional(&mut *conn)
            .await
            .during("lock record")?
            .map(|_| ())
            .ok_or_else(|| CollectionError::record_not_found(document_id, &def.slug))
    }

    pub async fn create_record(
        &self,
        pool: &PgPool,
        def: &CollectionDefinition,
        input: &RecordInput,
    ) -> Result<Record, CollectionError> {
        let values = RecordValidator::coerce(def, &input.data, WriteMode::Create)?;
        let links = RecordValidator::relations(def, &input.relations)?;

        let mut tx = pool.begin().await.during("begin transaction")?;
        self.check_unique(&mut tx, def, &values, None).await?;
        let document_id = Uuid::new_v4();
        let row = insert_record(&self.names, def, document_id, &values)
            .query()
            .fetch_one(&mut *tx)
            .await
            .during("create record")?;
        let record = Record::from_row(def, &row, false)?;
        for (field, targets) in &links {
            self.relations
                .insert_links(&mut tx, &def.slug, field, document_id, targets)
                .await?;
        }
        tx.commit().await.during("commit record")?;
        tracing::debug!(collection = %def.slug, document_id = %document_id, "record created");
        Ok(record)
    }

    /// Update scalar values; each relation field named in `input.relations` has its links replaced.
    pub async fn update_record(
        &self,
        pool: &PgPool,
        def: &CollectionDefinition,
        document_id: Uuid,
        input: &RecordInput,
    ) -> Result<Record, CollectionError> {
        let values = RecordValidator::coerce(def, &input.data, WriteMode::Update)?;
        let links = RecordValidator::relations(def, &input.relations)?;

        let mut tx = pool.begin().await.during("begin transaction")?;
        self.lock(&mut tx, def, document_id).await?;
        self.check_unique(&mut tx, def, &values, Some(document_id)).await?;
        let row = update_record(&self.names, def, document_id, &values)
            .query()
            .fetch_one(&mut *tx)
            .await
            .during("update record")?;
        let record = Record::from_row(def, &row, false)?;
        for (field, targets) in &links {
            self.relations.clear_links(&mut tx, &def.slug, field, document_id).await?;
            self.relations
                .insert_links(&mut tx, &def.slug, field, document_id, targets)
                .await?;
        }
        tx.commit().await.during("commit record")?;
        tracing::debug!(collection = %def.slug, document_id = %document_id, "record updated");
        Ok(record)
    }

    /// Delete the record's outgoing links for every relation field, then the row.
    pub async fn delete_record(
        &self,
        pool: &PgPool,
        def: &CollectionDefinition,
        document_id: Uuid,
    ) -> Result<(), CollectionError> {
        let mut tx = pool.begin().await.during("begin transaction")?;
        self.lock(&mut tx, def, document_id).await?;
        for (field, _) in def.relation_fields() {
            self.relations.clear_links(&mut tx, &def.slug, field, document_id).await?;
        }
        delete_record(&self.names, def, document_id)
            .query()
            .execute(&mut *tx)
            .await
            .during("delete record")?;
        tx.commit().await.during("commit record")?;
        tracing::debug!(collection = %def.slug, document_id = %document_id, "record deleted");
        Ok(())
    }
}
