//! Attachment lifecycle: registration, confirmation, and release.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tether_shared::config::AttachmentSettings;
use tether_shared::types::{AttachmentId, EntityId};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::error::{AttachmentError, StoreError};
use super::store::AttachmentStore;
use super::types::{Attachment, EntityType, RegisterTempInput};
use crate::storage::BlobGateway;

/// Lifecycle policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// How long a TEMP upload lives before it is eligible for reclamation.
    pub temp_ttl: chrono::Duration,
    /// Deadline applied to every store and blob call.
    pub operation_timeout: Duration,
}

impl LifecycleConfig {
    /// Default TEMP lifetime: 1 hour.
    pub const DEFAULT_TEMP_TTL_SECS: i64 = 3600;
    /// Default per-call deadline: 5 seconds.
    pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5000;

    /// Set the TEMP lifetime.
    #[must_use]
    pub fn with_temp_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.temp_ttl = ttl;
        self
    }

    /// Set the per-call deadline.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            temp_ttl: chrono::Duration::seconds(Self::DEFAULT_TEMP_TTL_SECS),
            operation_timeout: Duration::from_millis(Self::DEFAULT_OPERATION_TIMEOUT_MS),
        }
    }
}

impl From<&AttachmentSettings> for LifecycleConfig {
    fn from(settings: &AttachmentSettings) -> Self {
        let defaults = Self::default();
        let temp_ttl = i64::try_from(settings.temp_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(defaults.temp_ttl);

        Self {
            temp_ttl,
            operation_timeout: Duration::from_millis(settings.operation_timeout_ms),
        }
    }
}

/// What a best-effort release actually managed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Attachments handed to the release.
    pub requested: usize,
    /// Records left alone because they were no longer TEMP or already gone.
    pub rows_retained: usize,
    /// Blobs deleted, including ones that were already gone.
    pub blobs_deleted: usize,
    /// Blob deletions that failed or timed out; those objects are orphaned.
    pub blobs_failed: usize,
    /// Attachments whose URL yielded no key.
    pub blobs_skipped: usize,
    /// Records removed from the store.
    pub rows_deleted: u64,
    /// The record deletion failed; the rows remain for a later pass.
    pub row_delete_failed: bool,
}

/// Attachment lifecycle service.
///
/// Owns every state change an attachment goes through: TEMP registration,
/// TEMP → CONFIRMED binding, and release (blob cleanup plus record removal).
/// Raw store errors are translated here and go no further.
pub struct AttachmentLifecycle<S, B, C> {
    store: Arc<S>,
    blobs: Arc<B>,
    clock: Arc<C>,
    config: LifecycleConfig,
}

impl<S, B, C> Clone for AttachmentLifecycle<S, B, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            blobs: Arc::clone(&self.blobs),
            clock: Arc::clone(&self.clock),
            config: self.config,
        }
    }
}

impl<S, B, C> AttachmentLifecycle<S, B, C>
where
    S: AttachmentStore,
    B: BlobGateway,
    C: Clock,
{
    /// Create a new lifecycle service.
    #[must_use]
    pub fn new(store: Arc<S>, blobs: Arc<B>, clock: Arc<C>, config: LifecycleConfig) -> Self {
        Self {
            store,
            blobs,
            clock,
            config,
        }
    }

    /// Get the policy.
    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Current instant according to the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record an uploaded file as a TEMP attachment expiring after the TTL.
    ///
    /// No owner binding happens here.
    pub async fn register_temp(
        &self,
        input: RegisterTempInput,
    ) -> Result<Attachment, AttachmentError> {
        let now = self.clock.now();
        let expires_at = now.checked_add_signed(self.config.temp_ttl).ok_or_else(|| {
            AttachmentError::Internal(format!(
                "temp TTL of {}s overflows the expiry timestamp",
                self.config.temp_ttl.num_seconds()
            ))
        })?;
        let attachment = Attachment::new_temp(input, now, expires_at);

        let created = self
            .bounded("create", self.store.create(attachment))
            .await?;

        debug!(
            attachment_id = %created.id,
            entity_type = %created.entity_type,
            expires_at = ?created.expires_at,
            "Registered temporary attachment"
        );
        Ok(created)
    }

    /// Get attachment by ID.
    pub async fn get(&self, id: AttachmentId) -> Result<Attachment, AttachmentError> {
        self.bounded("find_by_id", self.store.find_by_id(id))
            .await?
            .ok_or_else(|| AttachmentError::not_found(id))
    }

    /// Fetch attachments by id, in the order the ids were given.
    ///
    /// Missing or deleted ids are left out.
    pub async fn find_by_ids(
        &self,
        ids: &[AttachmentId],
    ) -> Result<Vec<Attachment>, AttachmentError> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let found = self
            .bounded("find_by_ids", self.store.find_by_ids(&ids))
            .await?;

        let mut by_id: HashMap<AttachmentId, Attachment> =
            found.into_iter().map(|a| (a.id, a)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// List the confirmed attachments of an owner.
    pub async fn list_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        self.bounded(
            "find_by_entity",
            self.store.find_by_entity(entity_type, entity_id),
        )
        .await
    }

    /// Pre-flight check that every id exists, is TEMP, and was uploaded for
    /// `entity_type`.
    ///
    /// Nothing is reserved: the answer can go stale before
    /// [`confirm_batch`](Self::confirm_batch) runs, and only that call's
    /// result decides whether binding happened.
    pub async fn validate_for_confirm(
        &self,
        ids: &[AttachmentId],
        entity_type: EntityType,
    ) -> Result<(), AttachmentError> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Ok(());
        }

        let found = self.find_by_ids(&ids).await?;

        let present: HashSet<AttachmentId> = found.iter().map(|a| a.id).collect();
        let missing: Vec<AttachmentId> = ids
            .iter()
            .copied()
            .filter(|id| !present.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(AttachmentError::NotFound(missing));
        }

        for attachment in &found {
            if !attachment.is_temp() {
                return Err(AttachmentError::wrong_status(
                    attachment.id,
                    attachment.status,
                ));
            }
            if attachment.entity_type != entity_type {
                return Err(AttachmentError::wrong_entity_type(
                    attachment.id,
                    attachment.entity_type,
                    entity_type,
                ));
            }
        }

        Ok(())
    }

    /// Bind TEMP attachments to their owner.
    ///
    /// Succeeds only when the store reports that every distinct id qualified;
    /// otherwise nothing was bound and the call fails with
    /// [`AttachmentError::Validation`]. Already-confirmed, mistyped, missing,
    /// and deleted ids all surface the same way.
    pub async fn confirm_batch(
        &self,
        ids: &[AttachmentId],
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> Result<(), AttachmentError> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Ok(());
        }

        let now = self.clock.now();
        let matched = self
            .bounded(
                "confirm_batch",
                self.store
                    .confirm_batch(&ids, entity_type, entity_id, now),
            )
            .await?;

        if usize::try_from(matched) != Ok(ids.len()) {
            warn!(
                requested = ids.len(),
                matched,
                entity_type = %entity_type,
                entity_id = %entity_id,
                "Attachment confirmation rejected"
            );
            return Err(AttachmentError::short_confirmation(ids.len(), matched));
        }

        info!(
            count = ids.len(),
            entity_type = %entity_type,
            entity_id = %entity_id,
            "Confirmed attachments"
        );
        Ok(())
    }

    /// Delete the blobs behind `attachments`, then remove their records.
    ///
    /// Used for attachments whose owner is going away. Blob failures are
    /// logged and never stop the record deletion: a row must not outlive its
    /// release because of an unreachable or unparseable object. A failed
    /// record deletion is logged and left for the next pass. Nothing is
    /// returned as an error.
    pub async fn release_batch(&self, attachments: Vec<Attachment>) -> ReleaseReport {
        let mut report = ReleaseReport {
            requested: attachments.len(),
            ..ReleaseReport::default()
        };
        if attachments.is_empty() {
            return report;
        }

        self.delete_blobs(attachments.iter().collect(), &mut report)
            .await;

        let ids: Vec<AttachmentId> = attachments.iter().map(|a| a.id).collect();
        match self
            .bounded("hard_delete_batch", self.store.hard_delete_batch(&ids))
            .await
        {
            Ok(deleted) => report.rows_deleted = deleted,
            Err(e) => {
                error!(
                    count = ids.len(),
                    error = %e,
                    "Failed to delete attachment records"
                );
                report.row_delete_failed = true;
            }
        }

        log_report(&report);
        report
    }

    /// Like [`release_batch`](Self::release_batch), but only for attachments
    /// that are still TEMP, and atomic with respect to confirmation.
    ///
    /// The still-TEMP records are locked while their blobs are deleted, so an
    /// attachment confirmed after it was looked up keeps both its record and
    /// its blob, and one that is being reclaimed cannot be confirmed.
    pub async fn reclaim_batch(&self, attachments: Vec<Attachment>) -> ReleaseReport {
        let mut report = ReleaseReport {
            requested: attachments.len(),
            ..ReleaseReport::default()
        };
        if attachments.is_empty() {
            return report;
        }

        let ids: Vec<AttachmentId> = attachments.iter().map(|a| a.id).collect();
        // Each blob delete carries its own deadline; the lock is held across all of them.
        let deadline = self
            .config
            .operation_timeout
            .saturating_mul(u32::try_from(ids.len()).unwrap_or(u32::MAX).saturating_add(2));

        let all = &attachments;
        let reclaimed = self
            .bounded_for(
                "reclaim_temp",
                deadline,
                self.store.reclaim_temp(&ids, move |claimed| async move {
                    let claimed: HashSet<AttachmentId> = claimed.into_iter().collect();
                    let mut tally = ReleaseReport::default();
                    self.delete_blobs(
                        all.iter().filter(|a| claimed.contains(&a.id)).collect(),
                        &mut tally,
                    )
                    .await;
                    tally
                }),
            )
            .await;

        match reclaimed {
            Ok((removed, tally)) => {
                let removed: HashSet<AttachmentId> = removed.into_iter().collect();
                for attachment in attachments.iter().filter(|a| !removed.contains(&a.id)) {
                    debug!(
                        attachment_id = %attachment.id,
                        "Attachment no longer TEMP or already removed, skipping"
                    );
                }
                report.blobs_deleted = tally.blobs_deleted;
                report.blobs_failed = tally.blobs_failed;
                report.blobs_skipped = tally.blobs_skipped;
                report.rows_deleted = u64::try_from(removed.len()).unwrap_or(u64::MAX);
                report.rows_retained = attachments.len().saturating_sub(removed.len());
            }
            Err(e) => {
                error!(
                    count = ids.len(),
                    error = %e,
                    "Failed to reclaim attachment records"
                );
                report.row_delete_failed = true;
            }
        }

        log_report(&report);
        report
    }

    /// Best-effort blob deletion; outcomes are tallied into `report`.
    async fn delete_blobs(&self, attachments: Vec<&Attachment>, report: &mut ReleaseReport) {
        for attachment in attachments {
            let Some(key) = self.blobs.key_for_url(&attachment.file_url) else {
                warn!(
                    attachment_id = %attachment.id,
                    file_url = %attachment.file_url,
                    "Could not derive blob key, removing record only"
                );
                report.blobs_skipped += 1;
                continue;
            };

            match tokio::time::timeout(self.config.operation_timeout, self.blobs.delete(&key)).await
            {
                Ok(Ok(())) => report.blobs_deleted += 1,
                Ok(Err(e)) if e.is_not_found() => {
                    debug!(attachment_id = %attachment.id, key = %key, "Blob already gone");
                    report.blobs_deleted += 1;
                }
                Ok(Err(e)) => {
                    warn!(
                        attachment_id = %attachment.id,
                        key = %key,
                        error = %e,
                        "Blob delete failed, object left orphaned"
                    );
                    report.blobs_failed += 1;
                }
                Err(_) => {
                    warn!(
                        attachment_id = %attachment.id,
                        key = %key,
                        "Blob delete timed out, object left orphaned"
                    );
                    report.blobs_failed += 1;
                }
            }
        }
    }

    /// Run [`release_batch`](Self::release_batch) on the runtime without
    /// waiting for it.
    pub fn release_detached(&self, attachments: Vec<Attachment>) -> JoinHandle<ReleaseReport> {
        let lifecycle = self.clone();
        tokio::spawn(async move { lifecycle.release_batch(attachments).await })
    }

    /// Release everything bound to an owner that is being deleted.
    pub async fn release_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> Result<ReleaseReport, AttachmentError> {
        let attachments = self.list_for_entity(entity_type, entity_id).await?;
        Ok(self.release_batch(attachments).await)
    }

    /// Release uploads the client decided not to use.
    ///
    /// Only ids that are still TEMP are released; confirmed attachments are
    /// never reclaimed through this path, including ones confirmed while the
    /// release is under way.
    pub async fn release_unused(
        &self,
        ids: &[AttachmentId],
    ) -> Result<ReleaseReport, AttachmentError> {
        let (temp, confirmed): (Vec<Attachment>, Vec<Attachment>) = self
            .find_by_ids(ids)
            .await?
            .into_iter()
            .partition(Attachment::is_temp);

        for attachment in &confirmed {
            debug!(attachment_id = %attachment.id, "Skipping confirmed attachment");
        }

        Ok(self.reclaim_batch(temp).await)
    }

    /// Soft-delete every attachment bound to an owner that is itself being
    /// soft-deleted. Blobs are kept.
    pub async fn soft_delete_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> Result<u64, AttachmentError> {
        let ids: Vec<AttachmentId> = self
            .list_for_entity(entity_type, entity_id)
            .await?
            .iter()
            .map(|a| a.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let now = self.clock.now();
        self.bounded(
            "soft_delete_batch",
            self.store.soft_delete_batch(&ids, now),
        )
        .await
    }

    /// Soft-delete a single attachment. Deleting twice is not an error.
    pub async fn discard(&self, id: AttachmentId) -> Result<(), AttachmentError> {
        let now = self.clock.now();
        self.bounded("soft_delete", self.store.soft_delete(id, now))
            .await
    }

    /// TEMP attachments that expired before `now`.
    pub async fn expired_temp(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        self.bounded("find_expired_temp", self.store.find_expired_temp(now))
            .await
    }

    /// Apply the per-call deadline and translate store errors.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, AttachmentError> {
        self.bounded_for(operation, self.config.operation_timeout, fut)
            .await
    }

    async fn bounded_for<T>(
        &self,
        operation: &'static str,
        deadline: Duration,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, AttachmentError> {
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result.map_err(AttachmentError::from),
            Err(_) => Err(AttachmentError::unavailable(format!(
                "{operation} timed out after {deadline:?}"
            ))),
        }
    }
}

fn log_report(report: &ReleaseReport) {
    info!(
        requested = report.requested,
        rows_deleted = report.rows_deleted,
        rows_retained = report.rows_retained,
        blobs_deleted = report.blobs_deleted,
        blobs_failed = report.blobs_failed,
        blobs_skipped = report.blobs_skipped,
        "Released attachments"
    );
}

/// Drop repeated ids, keeping first-seen order.
fn distinct(ids: &[AttachmentId]) -> Vec<AttachmentId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
