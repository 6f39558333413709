//! Attachment repository for database operations.
//!
//! Implements [`AttachmentStore`] over Postgres using SeaORM.

use std::collections::HashSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use tether_core::attachment::{
    Attachment, AttachmentStatus, AttachmentStore, EntityType, StoreError,
};
use tether_shared::types::{AttachmentId, EntityId, UserId};
use tracing::debug;
use uuid::Uuid;

use crate::entities::attachments;
use crate::entities::sea_orm_active_enums::{
    AttachmentEntityType as DbEntityType, AttachmentStatus as DbStatus,
};

/// Attachment repository implementation.
#[derive(Debug, Clone)]
pub struct AttachmentRepository {
    db: DatabaseConnection,
}

impl AttachmentRepository {
    /// Create a new attachment repository.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

impl AttachmentStore for AttachmentRepository {
    async fn create(&self, attachment: Attachment) -> Result<Attachment, StoreError> {
        let id = attachment.id;
        let model = to_active_model(attachment)
            .insert(&self.db)
            .await
            .map_err(|e| match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => StoreError::Conflict(id),
                _ => store_error(e),
            })?;

        Ok(to_domain(model))
    }

    async fn find_by_id(&self, id: AttachmentId) -> Result<Option<Attachment>, StoreError> {
        let model = attachments::Entity::find_by_id(id.into_inner())
            .filter(attachments::Column::DeletedAt.is_null())
            .one(&self.db)
            .await
            .map_err(store_error)?;

        Ok(model.map(to_domain))
    }

    async fn find_by_ids(&self, ids: &[AttachmentId]) -> Result<Vec<Attachment>, StoreError> {
        let ids = distinct_uuids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let models = attachments::Entity::find()
            .filter(attachments::Column::Id.is_in(ids))
            .filter(attachments::Column::DeletedAt.is_null())
            .all(&self.db)
            .await
            .map_err(store_error)?;

        Ok(models.into_iter().map(to_domain).collect())
    }

    async fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> Result<Vec<Attachment>, StoreError> {
        let models = attachments::Entity::find()
            .filter(attachments::Column::EntityType.eq(to_db_entity_type(entity_type)))
            .filter(attachments::Column::EntityId.eq(entity_id.into_inner()))
            .filter(attachments::Column::Status.eq(DbStatus::Confirmed))
            .filter(attachments::Column::DeletedAt.is_null())
            .order_by_asc(attachments::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(store_error)?;

        Ok(models.into_iter().map(to_domain).collect())
    }

    async fn find_expired_temp(&self, now: DateTime<Utc>) -> Result<Vec<Attachment>, StoreError> {
        let models = attachments::Entity::find()
            .filter(attachments::Column::Status.eq(DbStatus::Temp))
            .filter(attachments::Column::ExpiresAt.lt(now))
            .filter(attachments::Column::DeletedAt.is_null())
            .order_by_asc(attachments::Column::ExpiresAt)
            .all(&self.db)
            .await
            .map_err(store_error)?;

        Ok(models.into_iter().map(to_domain).collect())
    }

    async fn confirm_batch(
        &self,
        ids: &[AttachmentId],
        entity_type: EntityType,
        entity_id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let ids = distinct_uuids(ids);
        if ids.is_empty() {
            return Ok(0);
        }
        let requested = ids.len();

        let txn = self.db.begin().await.map_err(store_error)?;

        // Row locks serialize overlapping batches; a waiting UPDATE re-checks
        // the status predicate once the holder commits.
        let result = attachments::Entity::update_many()
            .col_expr(attachments::Column::Status, DbStatus::Confirmed.as_enum())
            .col_expr(
                attachments::Column::EntityId,
                Expr::value(entity_id.into_inner()),
            )
            .col_expr(
                attachments::Column::ExpiresAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(attachments::Column::UpdatedAt, Expr::value(now))
            .filter(attachments::Column::Id.is_in(ids))
            .filter(attachments::Column::Status.eq(DbStatus::Temp))
            .filter(attachments::Column::EntityType.eq(to_db_entity_type(entity_type)))
            .filter(attachments::Column::DeletedAt.is_null())
            .exec(&txn)
            .await
            .map_err(store_error)?;

        let matched = result.rows_affected;
        if usize::try_from(matched) == Ok(requested) {
            txn.commit().await.map_err(store_error)?;
        } else {
            debug!(requested, matched, "Rolling back partial confirmation");
            txn.rollback().await.map_err(store_error)?;
        }

        Ok(matched)
    }

    async fn soft_delete(&self, id: AttachmentId, now: DateTime<Utc>) -> Result<(), StoreError> {
        attachments::Entity::update_many()
            .col_expr(attachments::Column::DeletedAt, Expr::value(now))
            .col_expr(attachments::Column::UpdatedAt, Expr::value(now))
            .filter(attachments::Column::Id.eq(id.into_inner()))
            .filter(attachments::Column::DeletedAt.is_null())
            .exec(&self.db)
            .await
            .map_err(store_error)?;

        Ok(())
    }

    async fn soft_delete_batch(
        &self,
        ids: &[AttachmentId],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let ids = distinct_uuids(ids);
        if ids.is_empty() {
            return Ok(0);
        }

        let result = attachments::Entity::update_many()
            .col_expr(attachments::Column::DeletedAt, Expr::value(now))
            .col_expr(attachments::Column::UpdatedAt, Expr::value(now))
            .filter(attachments::Column::Id.is_in(ids))
            .filter(attachments::Column::DeletedAt.is_null())
            .exec(&self.db)
            .await
            .map_err(store_error)?;

        Ok(result.rows_affected)
    }

    async fn hard_delete_batch(&self, ids: &[AttachmentId]) -> Result<u64, StoreError> {
        let ids = distinct_uuids(ids);
        if ids.is_empty() {
            return Ok(0);
        }

        let result = attachments::Entity::delete_many()
            .filter(attachments::Column::Id.is_in(ids))
            .exec(&self.db)
            .await
            .map_err(store_error)?;

        Ok(result.rows_affected)
    }

    async fn reclaim_temp<F, Fut>(
        &self,
        ids: &[AttachmentId],
        release: F,
    ) -> Result<(Vec<AttachmentId>, Fut::Output), StoreError>
    where
        F: FnOnce(Vec<AttachmentId>) -> Fut + Send,
        Fut: Future + Send,
        Fut::Output: Send,
    {
        let ids = distinct_uuids(ids);
        if ids.is_empty() {
            return Ok((Vec::new(), release(Vec::new()).await));
        }

        let txn = self.db.begin().await.map_err(store_error)?;

        // FOR UPDATE makes a racing confirmation wait until commit, after
        // which it finds no row. A confirmation that committed first fails
        // the status re-check here instead.
        let locked: Vec<Uuid> = attachments::Entity::find()
            .select_only()
            .column(attachments::Column::Id)
            .filter(attachments::Column::Id.is_in(ids))
            .filter(attachments::Column::Status.eq(DbStatus::Temp))
            .filter(attachments::Column::DeletedAt.is_null())
            .lock_exclusive()
            .into_tuple()
            .all(&txn)
            .await
            .map_err(store_error)?;

        let claimed: Vec<AttachmentId> =
            locked.iter().copied().map(AttachmentId::from_uuid).collect();
        let released = release(claimed.clone()).await;

        if locked.is_empty() {
            txn.rollback().await.map_err(store_error)?;
            return Ok((claimed, released));
        }

        attachments::Entity::delete_many()
            .filter(attachments::Column::Id.is_in(locked))
            .exec(&txn)
            .await
            .map_err(store_error)?;
        txn.commit().await.map_err(store_error)?;

        debug!(count = claimed.len(), "Reclaimed TEMP attachment records");
        Ok((claimed, released))
    }
}

fn distinct_uuids(ids: &[AttachmentId]) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .map(|id| id.into_inner())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Classify a database error for the lifecycle layer.
fn store_error(err: DbErr) -> StoreError {
    match err {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => StoreError::Unavailable(err.to_string()),
        _ => StoreError::database(err.to_string()),
    }
}

fn to_db_entity_type(t: EntityType) -> DbEntityType {
    match t {
        EntityType::Board => DbEntityType::Board,
        EntityType::Project => DbEntityType::Project,
        EntityType::Comment => DbEntityType::Comment,
        EntityType::UserProfile => DbEntityType::UserProfile,
    }
}

fn from_db_entity_type(t: DbEntityType) -> EntityType {
    match t {
        DbEntityType::Board => EntityType::Board,
        DbEntityType::Project => EntityType::Project,
        DbEntityType::Comment => EntityType::Comment,
        DbEntityType::UserProfile => EntityType::UserProfile,
    }
}

fn to_db_status(s: AttachmentStatus) -> DbStatus {
    match s {
        AttachmentStatus::Temp => DbStatus::Temp,
        AttachmentStatus::Confirmed => DbStatus::Confirmed,
    }
}

fn from_db_status(s: DbStatus) -> AttachmentStatus {
    match s {
        DbStatus::Temp => AttachmentStatus::Temp,
        DbStatus::Confirmed => AttachmentStatus::Confirmed,
    }
}

fn to_active_model(a: Attachment) -> attachments::ActiveModel {
    attachments::ActiveModel {
        id: Set(a.id.into_inner()),
        entity_type: Set(to_db_entity_type(a.entity_type)),
        entity_id: Set(a.entity_id.map(EntityId::into_inner)),
        file_name: Set(a.file_name),
        content_type: Set(a.content_type),
        file_size: Set(a.file_size),
        file_url: Set(a.file_url),
        uploaded_by: Set(a.uploaded_by.into_inner()),
        status: Set(to_db_status(a.status)),
        expires_at: Set(a.expires_at.map(Into::into)),
        created_at: Set(a.created_at.into()),
        updated_at: Set(a.updated_at.into()),
        deleted_at: Set(a.deleted_at.map(Into::into)),
    }
}

fn to_domain(model: attachments::Model) -> Attachment {
    Attachment {
        id: AttachmentId::from_uuid(model.id),
        entity_type: from_db_entity_type(model.entity_type),
        entity_id: model.entity_id.map(EntityId::from_uuid),
        file_name: model.file_name,
        content_type: model.content_type,
        file_size: model.file_size,
        file_url: model.file_url,
        uploaded_by: UserId::from_uuid(model.uploaded_by),
        status: from_db_status(model.status),
        expires_at: model.expires_at.map(|t| t.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
        deleted_at: model.deleted_at.map(|t| t.with_timezone(&Utc)),
    }
}
