//! In-memory doubles for lifecycle, saga, and sweeper tests.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tether_shared::types::{AttachmentId, EntityId, UserId};
use tokio::sync::Notify;

use super::clock::Clock;
use super::error::StoreError;
use super::lifecycle::{AttachmentLifecycle, LifecycleConfig};
use super::saga::{EntityError, EntityRepository};
use super::store::AttachmentStore;
use super::types::{Attachment, AttachmentStatus, EntityType, RegisterTempInput};
use crate::storage::{BlobGateway, StorageError};

pub(crate) type TestLifecycle = AttachmentLifecycle<InMemoryStore, RecordingBlobs, ManualClock>;

pub(crate) fn lifecycle(
    store: &Arc<InMemoryStore>,
    blobs: &Arc<RecordingBlobs>,
    clock: &Arc<ManualClock>,
) -> TestLifecycle {
    AttachmentLifecycle::new(
        Arc::clone(store),
        Arc::clone(blobs),
        Arc::clone(clock),
        LifecycleConfig::default(),
    )
}

pub(crate) fn upload(entity_type: EntityType, file_name: &str) -> RegisterTempInput {
    RegisterTempInput {
        entity_type,
        file_name: file_name.to_string(),
        file_url: format!(
            "https://tether.s3.us-east-1.amazonaws.com/{}/{file_name}",
            entity_type.as_str().to_ascii_lowercase()
        ),
        file_size: 1024,
        content_type: "application/octet-stream".to_string(),
        uploaded_by: UserId::new(),
    }
}

pub(crate) fn board_upload(file_name: &str) -> RegisterTempInput {
    upload(EntityType::Board, file_name)
}

/// Attachment store over a single mutex, so every call is atomic.
#[derive(Default)]
pub(crate) struct InMemoryStore {
    rows: Mutex<HashMap<AttachmentId, Attachment>>,
    conflict_next_create: AtomicBool,
    fail_next_hard_delete: AtomicBool,
    panic_next_expired_lookup: AtomicBool,
    next_lookup_error: Mutex<Option<StoreError>>,
    confirm_delay: Mutex<Option<Duration>>,
    confirm_calls: AtomicUsize,
    bind_before_next_confirm: Mutex<Option<EntityId>>,
    reclaim_gate: Mutex<Option<Arc<Gate>>>,
    locked: Mutex<HashSet<AttachmentId>>,
}

impl InMemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Row as stored, deleted or not.
    pub(crate) fn raw(&self, id: AttachmentId) -> Option<Attachment> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub(crate) fn all(&self) -> Vec<Attachment> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    /// Insert a TEMP row with an explicit expiry.
    pub(crate) fn seed_temp(&self, entity_type: EntityType, expires_at: DateTime<Utc>) -> AttachmentId {
        let created = expires_at - chrono::Duration::hours(1);
        let attachment = Attachment::new_temp(
            upload(entity_type, &format!("seed-{}.bin", AttachmentId::new())),
            created,
            expires_at,
        );
        let id = attachment.id;
        self.rows.lock().unwrap().insert(id, attachment);
        id
    }

    pub(crate) fn fail_next_create_with_conflict(&self) {
        self.conflict_next_create.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_hard_delete(&self) {
        self.fail_next_hard_delete.store(true, Ordering::SeqCst);
    }

    pub(crate) fn panic_next_expired_lookup(&self) {
        self.panic_next_expired_lookup.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_lookup(&self, err: StoreError) {
        *self.next_lookup_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn delay_confirm(&self, delay: Duration) {
        *self.confirm_delay.lock().unwrap() = Some(delay);
    }

    /// On the next confirmation, bind the requested ids to `owner` first, as
    /// if another request had won the race after pre-flight.
    pub(crate) fn bind_before_next_confirm(&self, owner: EntityId) {
        *self.bind_before_next_confirm.lock().unwrap() = Some(owner);
    }

    /// Make the next reclaim wait on the returned gate before it locks rows.
    pub(crate) fn hold_next_reclaim(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.reclaim_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    fn take_lookup_error(&self) -> Result<(), StoreError> {
        match self.next_lookup_error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl AttachmentStore for InMemoryStore {
    async fn create(&self, attachment: Attachment) -> Result<Attachment, StoreError> {
        if self.conflict_next_create.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Conflict(attachment.id));
        }
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&attachment.id) {
            return Err(StoreError::Conflict(attachment.id));
        }
        rows.insert(attachment.id, attachment.clone());
        Ok(attachment)
    }

    async fn find_by_id(&self, id: AttachmentId) -> Result<Option<Attachment>, StoreError> {
        self.take_lookup_error()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&id)
            .filter(|a| !a.is_deleted())
            .cloned())
    }

    async fn find_by_ids(&self, ids: &[AttachmentId]) -> Result<Vec<Attachment>, StoreError> {
        self.take_lookup_error()?;
        let rows = self.rows.lock().unwrap();
        let wanted: HashSet<&AttachmentId> = ids.iter().collect();
        Ok(wanted
            .into_iter()
            .filter_map(|id| rows.get(id))
            .filter(|a| !a.is_deleted())
            .cloned()
            .collect())
    }

    async fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> Result<Vec<Attachment>, StoreError> {
        self.take_lookup_error()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|a| {
                !a.is_deleted()
                    && a.status == AttachmentStatus::Confirmed
                    && a.entity_type == entity_type
                    && a.entity_id == Some(entity_id)
            })
            .cloned()
            .collect())
    }

    async fn find_expired_temp(&self, now: DateTime<Utc>) -> Result<Vec<Attachment>, StoreError> {
        if self.panic_next_expired_lookup.swap(false, Ordering::SeqCst) {
            panic!("simulated expired lookup failure");
        }
        self.take_lookup_error()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|a| !a.is_deleted() && a.is_expired(now))
            .cloned()
            .collect())
    }

    async fn confirm_batch(
        &self,
        ids: &[AttachmentId],
        entity_type: EntityType,
        entity_id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.confirm_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut rows = self.rows.lock().unwrap();
        if let Some(rival) = self.bind_before_next_confirm.lock().unwrap().take() {
            for id in ids {
                if let Some(row) = rows.get_mut(id) {
                    row.status = AttachmentStatus::Confirmed;
                    row.entity_id = Some(rival);
                    row.expires_at = None;
                }
            }
        }
        let locked = self.locked.lock().unwrap();
        let distinct: HashSet<AttachmentId> = ids.iter().copied().collect();
        // A locked row is being reclaimed; it is gone by the time the lock is released.
        let eligible: Vec<AttachmentId> = distinct
            .iter()
            .copied()
            .filter(|id| {
                !locked.contains(id)
                    && rows.get(id).is_some_and(|a| {
                        a.is_temp() && !a.is_deleted() && a.entity_type == entity_type
                    })
            })
            .collect();

        if eligible.len() == distinct.len() {
            for id in &eligible {
                if let Some(row) = rows.get_mut(id) {
                    row.status = AttachmentStatus::Confirmed;
                    row.entity_id = Some(entity_id);
                    row.expires_at = None;
                    row.updated_at = now;
                }
            }
        }

        Ok(eligible.len() as u64)
    }

    async fn soft_delete(&self, id: AttachmentId, now: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            if row.deleted_at.is_none() {
                row.deleted_at = Some(now);
                row.updated_at = now;
            }
        }
        Ok(())
    }

    async fn soft_delete_batch(
        &self,
        ids: &[AttachmentId],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let mut marked = 0;
        for id in ids {
            if let Some(row) = rows.get_mut(id) {
                if row.deleted_at.is_none() {
                    row.deleted_at = Some(now);
                    row.updated_at = now;
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    async fn hard_delete_batch(&self, ids: &[AttachmentId]) -> Result<u64, StoreError> {
        if self.fail_next_hard_delete.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        let mut rows = self.rows.lock().unwrap();
        Ok(ids.iter().filter(|id| rows.remove(id).is_some()).count() as u64)
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
        let gate = self.reclaim_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let claimed: Vec<AttachmentId> = {
            let rows = self.rows.lock().unwrap();
            let mut locked = self.locked.lock().unwrap();
            ids.iter()
                .copied()
                .collect::<HashSet<_>>()
                .into_iter()
                .filter(|id| rows.get(id).is_some_and(|a| a.is_temp() && !a.is_deleted()))
                .filter(|id| locked.insert(*id))
                .collect()
        };
        let _unlock = Unlock {
            locked: &self.locked,
            ids: claimed.clone(),
        };

        let released = release(claimed.clone()).await;

        if self.fail_next_hard_delete.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        let mut rows = self.rows.lock().unwrap();
        for id in &claimed {
            rows.remove(id);
        }
        Ok((claimed, released))
    }
}

/// Drops the row locks taken by a reclaim, on every exit path.
struct Unlock<'a> {
    locked: &'a Mutex<HashSet<AttachmentId>>,
    ids: Vec<AttachmentId>,
}

impl Drop for Unlock<'_> {
    fn drop(&mut self) {
        let mut locked = self.locked.lock().unwrap();
        for id in &self.ids {
            locked.remove(id);
        }
    }
}

/// Pauses a call until released.
#[derive(Default)]
pub(crate) struct Gate {
    pub(crate) entered: Notify,
    pub(crate) release: Notify,
}

/// Blob gateway that records deleted keys.
#[derive(Default)]
pub(crate) struct RecordingBlobs {
    deleted: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    gate: Mutex<Option<Arc<Gate>>>,
    gone: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl RecordingBlobs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_key(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    /// Report `key` as already missing from storage.
    pub(crate) fn forget_key(&self, key: &str) {
        self.gone.lock().unwrap().insert(key.to_string());
    }

    /// Make every delete wait on the returned gate.
    pub(crate) fn hold(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

impl BlobGateway for RecordingBlobs {
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        if self.failing.lock().unwrap().contains(key) {
            return Err(StorageError::operation("access denied"));
        }
        if self.gone.lock().unwrap().contains(key) {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// Clock that only moves when told to.
pub(crate) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub(crate) fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        ManualClock::now(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Board {
    pub(crate) id: EntityId,
    pub(crate) title: String,
}

/// Board table double.
#[derive(Default)]
pub(crate) struct FakeBoards {
    rows: Mutex<HashMap<EntityId, Board>>,
    fail_create: AtomicBool,
    fail_delete: AtomicBool,
    deletes: AtomicUsize,
}

impl FakeBoards {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub(crate) fn contains(&self, id: EntityId) -> bool {
        self.rows.lock().unwrap().contains_key(&id)
    }

    pub(crate) fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }
}

impl EntityRepository for FakeBoards {
    type Draft = String;
    type Entity = Board;

    async fn create(&self, title: String) -> Result<Board, EntityError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(EntityError::repository("insert failed"));
        }
        let board = Board {
            id: EntityId::new(),
            title,
        };
        self.rows.lock().unwrap().insert(board.id, board.clone());
        Ok(board)
    }

    async fn delete(&self, id: EntityId) -> Result<(), EntityError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(EntityError::repository("delete failed"));
        }
        self.rows
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(EntityError::NotFound(id))
    }

    fn entity_id(board: &Board) -> EntityId {
        board.id
    }
}
