//! Persistence seam for attachment records.

use std::future::Future;

use chrono::{DateTime, Utc};
use tether_shared::types::{AttachmentId, EntityId};

use super::error::StoreError;
use super::types::{Attachment, EntityType};

/// Repository trait for attachment persistence.
///
/// Implemented by the db crate over Postgres. Every lookup excludes
/// soft-deleted rows. Timestamps are passed in so that callers own the clock.
pub trait AttachmentStore: Send + Sync + 'static {
    /// Insert a new TEMP row.
    ///
    /// Fails with [`StoreError::Conflict`] only on id collision.
    fn create(
        &self,
        attachment: Attachment,
    ) -> impl Future<Output = Result<Attachment, StoreError>> + Send;

    /// Point lookup.
    fn find_by_id(
        &self,
        id: AttachmentId,
    ) -> impl Future<Output = Result<Option<Attachment>, StoreError>> + Send;

    /// Attachments matching any of `ids`.
    ///
    /// The result may be shorter than `ids`; a short result means not all were found.
    fn find_by_ids(
        &self,
        ids: &[AttachmentId],
    ) -> impl Future<Output = Result<Vec<Attachment>, StoreError>> + Send;

    /// CONFIRMED attachments bound to the given owner.
    fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> impl Future<Output = Result<Vec<Attachment>, StoreError>> + Send;

    /// TEMP rows whose `expires_at` is strictly before `now`.
    fn find_expired_temp(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Attachment>, StoreError>> + Send;

    /// Bind every id in `ids` to the owner in a single conditional write.
    ///
    /// A row qualifies only while it is TEMP, not deleted, and tagged with
    /// `entity_type`. Returns how many rows qualified. When that count differs
    /// from the number of distinct ids nothing is written. Two concurrent calls
    /// over overlapping ids never both count the same row.
    fn confirm_batch(
        &self,
        ids: &[AttachmentId],
        entity_type: EntityType,
        entity_id: EntityId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Mark one row deleted. Deleting an already-deleted row is a no-op.
    fn soft_delete(
        &self,
        id: AttachmentId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Mark rows deleted; returns how many were newly marked.
    fn soft_delete_batch(
        &self,
        ids: &[AttachmentId],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Permanently remove rows; missing ids are ignored.
    fn hard_delete_batch(
        &self,
        ids: &[AttachmentId],
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Reclaim the rows among `ids` that are still TEMP and not deleted.
    ///
    /// Those rows are locked, `release` runs with their ids, and then exactly
    /// those rows are removed. While the lock is held a concurrent
    /// [`confirm_batch`](Self::confirm_batch) cannot bind them, so a row is
    /// either bound or reclaimed, never both. If the removal fails the rows
    /// are left as they were for a later pass.
    fn reclaim_temp<F, Fut>(
        &self,
        ids: &[AttachmentId],
        release: F,
    ) -> impl Future<Output = Result<(Vec<AttachmentId>, Fut::Output), StoreError>> + Send
    where
        F: FnOnce(Vec<AttachmentId>) -> Fut + Send,
        Fut: Future + Send,
        Fut::Output: Send;
}
