//! Owner-entity creation with attachment binding and compensation.
//!
//! The owner row and the attachment rows live behind different repositories,
//! so there is no shared transaction. Creation runs as three steps: validate,
//! create the owner, confirm the attachments. When the last step fails the
//! owner is deleted again and the confirmation error is returned.

use std::collections::HashSet;
use std::future::Future;

use tether_shared::AppError;
use tether_shared::types::{AttachmentId, EntityId};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::clock::Clock;
use super::error::AttachmentError;
use super::lifecycle::{AttachmentLifecycle, ReleaseReport};
use super::store::AttachmentStore;
use super::types::{Attachment, EntityType};
use crate::storage::BlobGateway;

/// Errors raised by an owner-entity repository.
#[derive(Debug, Error)]
pub enum EntityError {
    /// The owner does not exist.
    #[error("entity not found: {0}")]
    NotFound(EntityId),

    /// Any other repository failure.
    #[error("entity repository error: {0}")]
    Repository(String),
}

impl EntityError {
    /// Create a repository error.
    #[must_use]
    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }
}

/// Persistence for an owner entity (board, project, ...).
pub trait EntityRepository: Send + Sync {
    /// Creation payload.
    type Draft: Send;
    /// Persisted entity.
    type Entity: Send;

    /// Insert the entity.
    fn create(
        &self,
        draft: Self::Draft,
    ) -> impl Future<Output = Result<Self::Entity, EntityError>> + Send;

    /// Remove the entity. Used for compensation and owner deletion.
    fn delete(&self, id: EntityId) -> impl Future<Output = Result<(), EntityError>> + Send;

    /// Id the attachments are bound to.
    fn entity_id(entity: &Self::Entity) -> EntityId;
}

/// Saga failures.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Attachment validation or confirmation failed.
    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    /// The owner repository failed.
    #[error(transparent)]
    Entity(#[from] EntityError),
}

impl From<SagaError> for AppError {
    fn from(err: SagaError) -> Self {
        match err {
            SagaError::Attachment(e) => e.into(),
            SagaError::Entity(EntityError::NotFound(id)) => {
                Self::NotFound(format!("entity not found: {id}"))
            }
            SagaError::Entity(EntityError::Repository(msg)) => Self::Database(msg),
        }
    }
}

/// A created owner with its confirmed attachments.
#[derive(Debug)]
pub struct CreatedEntity<E> {
    /// The persisted owner.
    pub entity: E,
    /// Confirmed attachments, in request order.
    pub attachments: Vec<Attachment>,
}

/// Result of rebinding an owner's attachment set.
#[derive(Debug)]
pub struct AttachmentReplacement {
    /// The owner's attachments after the update, in request order.
    pub attachments: Vec<Attachment>,
    /// Background release of the attachments that were dropped.
    pub release: Option<JoinHandle<ReleaseReport>>,
}

/// Coordinates owner persistence with attachment confirmation.
pub struct EntityCreationSaga<S, B, C> {
    lifecycle: AttachmentLifecycle<S, B, C>,
}

impl<S, B, C> Clone for EntityCreationSaga<S, B, C> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: self.lifecycle.clone(),
        }
    }
}

impl<S, B, C> EntityCreationSaga<S, B, C>
where
    S: AttachmentStore,
    B: BlobGateway,
    C: Clock,
{
    /// Create a new saga over a lifecycle service.
    #[must_use]
    pub fn new(lifecycle: AttachmentLifecycle<S, B, C>) -> Self {
        Self { lifecycle }
    }

    /// Get the lifecycle service.
    #[must_use]
    pub fn lifecycle(&self) -> &AttachmentLifecycle<S, B, C> {
        &self.lifecycle
    }

    /// Create an owner and bind `attachment_ids` to it.
    ///
    /// Either both the owner and every attachment binding persist, or the
    /// owner is removed again and the attachments stay TEMP. A failure of
    /// that removal is logged; the confirmation error is still what the
    /// caller sees.
    pub async fn create<R>(
        &self,
        repo: &R,
        draft: R::Draft,
        attachment_ids: &[AttachmentId],
        entity_type: EntityType,
    ) -> Result<CreatedEntity<R::Entity>, SagaError>
    where
        R: EntityRepository,
    {
        self.lifecycle
            .validate_for_confirm(attachment_ids, entity_type)
            .await?;

        let entity = repo.create(draft).await?;

        if attachment_ids.is_empty() {
            return Ok(CreatedEntity {
                entity,
                attachments: Vec::new(),
            });
        }

        let entity_id = R::entity_id(&entity);
        if let Err(err) = self
            .lifecycle
            .confirm_batch(attachment_ids, entity_type, entity_id)
            .await
        {
            warn!(
                entity_type = %entity_type,
                entity_id = %entity_id,
                error = %err,
                "Attachment confirmation failed, removing entity"
            );
            self.compensate(repo, entity_type, entity_id).await;
            return Err(err.into());
        }

        let attachments = match self.lifecycle.find_by_ids(attachment_ids).await {
            Ok(attachments) => attachments,
            Err(e) => {
                warn!(
                    entity_id = %entity_id,
                    error = %e,
                    "Confirmed attachments could not be read back"
                );
                Vec::new()
            }
        };

        Ok(CreatedEntity {
            entity,
            attachments,
        })
    }

    /// Rebind an existing owner's attachment set to `attachment_ids`.
    ///
    /// Currently bound attachments absent from the new set are released in the
    /// background. New ids must be TEMP and of `entity_type`; ids already bound
    /// to this owner are kept as they are.
    pub async fn replace_attachments(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        attachment_ids: &[AttachmentId],
    ) -> Result<AttachmentReplacement, AttachmentError> {
        let wanted: HashSet<AttachmentId> = attachment_ids.iter().copied().collect();
        let (kept, dropped): (Vec<Attachment>, Vec<Attachment>) = self
            .lifecycle
            .list_for_entity(entity_type, entity_id)
            .await?
            .into_iter()
            .partition(|a| wanted.contains(&a.id));

        let kept: HashSet<AttachmentId> = kept.iter().map(|a| a.id).collect();
        let added: Vec<AttachmentId> = attachment_ids
            .iter()
            .copied()
            .filter(|id| !kept.contains(id))
            .collect();

        self.lifecycle
            .validate_for_confirm(&added, entity_type)
            .await?;

        let release = if dropped.is_empty() {
            None
        } else {
            info!(
                entity_type = %entity_type,
                entity_id = %entity_id,
                count = dropped.len(),
                "Releasing detached attachments"
            );
            Some(self.lifecycle.release_detached(dropped))
        };

        self.lifecycle
            .confirm_batch(&added, entity_type, entity_id)
            .await?;

        let attachments = self.lifecycle.find_by_ids(attachment_ids).await?;
        Ok(AttachmentReplacement {
            attachments,
            release,
        })
    }

    /// Delete an owner and release everything bound to it in the background.
    pub async fn delete<R>(
        &self,
        repo: &R,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> Result<Option<JoinHandle<ReleaseReport>>, SagaError>
    where
        R: EntityRepository,
    {
        let attachments = self
            .lifecycle
            .list_for_entity(entity_type, entity_id)
            .await?;

        repo.delete(entity_id).await?;

        if attachments.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.lifecycle.release_detached(attachments)))
    }

    async fn compensate<R>(&self, repo: &R, entity_type: EntityType, entity_id: EntityId)
    where
        R: EntityRepository,
    {
        let timeout = self.lifecycle.config().operation_timeout;
        match tokio::time::timeout(timeout, repo.delete(entity_id)).await {
            Ok(Ok(())) => info!(
                entity_type = %entity_type,
                entity_id = %entity_id,
                "Compensated entity creation"
            ),
            Ok(Err(e)) => error!(
                entity_type = %entity_type,
                entity_id = %entity_id,
                error = %e,
                "Compensating delete failed, entity left orphaned"
            ),
            Err(_) => error!(
                entity_type = %entity_type,
                entity_id = %entity_id,
                "Compensating delete timed out, entity left orphaned"
            ),
        }
    }
}
