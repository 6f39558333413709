//! Property-based and concurrency tests for the attachment lifecycle.
//!
//! - Status, owner, and expiry always agree after any operation sequence
//! - A failed batch confirmation changes nothing
//! - Confirmed attachments are never reclaimed by expiry or unused release
//! - Concurrent confirmations of one upload bind it at most once

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use proptest::prelude::*;
use tether_shared::types::{AttachmentId, EntityId};
use tokio::task::JoinSet;

use super::sweeper::ExpirationSweeper;
use super::testing::{InMemoryStore, ManualClock, RecordingBlobs, board_upload, lifecycle, upload};
use super::types::{Attachment, AttachmentStatus, EntityType};

#[derive(Debug, Clone)]
enum Op {
    Register(EntityType),
    Confirm {
        picks: Vec<usize>,
        entity_type: EntityType,
    },
    Discard(usize),
    Advance(i64),
    Sweep,
    ReleaseUnused(Vec<usize>),
}

fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
    prop_oneof![
        Just(EntityType::Board),
        Just(EntityType::Project),
        Just(EntityType::Comment),
        Just(EntityType::UserProfile),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => entity_type_strategy().prop_map(Op::Register),
        3 => (prop::collection::vec(0usize..32, 1..4), entity_type_strategy())
            .prop_map(|(picks, entity_type)| Op::Confirm { picks, entity_type }),
        1 => (0usize..32).prop_map(Op::Discard),
        2 => (1i64..120).prop_map(Op::Advance),
        1 => Just(Op::Sweep),
        1 => prop::collection::vec(0usize..32, 1..3).prop_map(Op::ReleaseUnused),
    ]
}

fn pick(ids: &[AttachmentId], picks: &[usize]) -> Vec<AttachmentId> {
    if ids.is_empty() {
        return Vec::new();
    }
    picks.iter().map(|i| ids[i % ids.len()]).collect()
}

fn snapshot(store: &InMemoryStore, ids: &[AttachmentId]) -> Vec<Option<Attachment>> {
    ids.iter().map(|id| store.raw(*id)).collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_lifecycle_preserves_consistency(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = runtime();
        rt.block_on(async {
            let store = Arc::new(InMemoryStore::new());
            let blobs = Arc::new(RecordingBlobs::new());
            let clock = Arc::new(ManualClock::new());
            let service = lifecycle(&store, &blobs, &clock);
            let sweeper = ExpirationSweeper::new(service.clone());

            let mut registered: Vec<AttachmentId> = Vec::new();
            let mut confirmed: Vec<AttachmentId> = Vec::new();

            for op in ops {
                match op {
                    Op::Register(entity_type) => {
                        let a = service.register_temp(upload(entity_type, "f.bin")).await.unwrap();
                        registered.push(a.id);
                    }
                    Op::Confirm { picks, entity_type } => {
                        let ids = pick(&registered, &picks);
                        let before = snapshot(&store, &ids);
                        let owner = EntityId::new();
                        match service.confirm_batch(&ids, entity_type, owner).await {
                            Ok(()) => confirmed.extend(ids.iter().copied()),
                            Err(_) => {
                                prop_assert_eq!(snapshot(&store, &ids), before);
                            }
                        }
                    }
                    Op::Discard(i) => {
                        if let Some(id) = pick(&registered, &[i]).first() {
                            service.discard(*id).await.unwrap();
                        }
                    }
                    Op::Advance(minutes) => clock.advance(ChronoDuration::minutes(minutes)),
                    Op::Sweep => {
                        sweeper.run_once().await;
                    }
                    Op::ReleaseUnused(picks) => {
                        let ids = pick(&registered, &picks);
                        service.release_unused(&ids).await.unwrap();
                    }
                }

                for row in store.all() {
                    prop_assert!(row.is_consistent(), "inconsistent row: {:?}", row);
                }
                for id in &confirmed {
                    let row = store.raw(*id);
                    prop_assert!(row.is_some(), "confirmed attachment {} was reclaimed", id);
                    prop_assert_eq!(row.map(|r| r.status), Some(AttachmentStatus::Confirmed));
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_confirm_binds_once() {
    let store = Arc::new(InMemoryStore::new());
    let blobs = Arc::new(RecordingBlobs::new());
    let clock = Arc::new(ManualClock::new());
    let service = lifecycle(&store, &blobs, &clock);

    let a = service.register_temp(board_upload("shared.png")).await.unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let service = service.clone();
        tasks.spawn(async move {
            let owner = EntityId::new();
            service
                .confirm_batch(&[a.id], EntityType::Board, owner)
                .await
                .map(|()| owner)
        });
    }

    let mut winners = Vec::new();
    while let Some(result) = tasks.join_next().await {
        if let Ok(owner) = result.unwrap() {
            winners.push(owner);
        }
    }

    assert_eq!(winners.len(), 1);
    let row = store.raw(a.id).unwrap();
    assert_eq!(row.entity_id, Some(winners[0]));
    assert!(row.is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_batches_never_split_an_upload() {
    let store = Arc::new(InMemoryStore::new());
    let blobs = Arc::new(RecordingBlobs::new());
    let clock = Arc::new(ManualClock::new());
    let service = lifecycle(&store, &blobs, &clock);

    let mut ids = Vec::new();
    for name in ["x.png", "y.png", "z.png"] {
        ids.push(service.register_temp(board_upload(name)).await.unwrap().id);
    }
    let left = vec![ids[0], ids[1]];
    let right = vec![ids[1], ids[2]];

    let mut tasks = JoinSet::new();
    for batch in [left.clone(), right.clone(), left, right] {
        let service = service.clone();
        tasks.spawn(async move {
            let owner = EntityId::new();
            service
                .confirm_batch(&batch, EntityType::Board, owner)
                .await
                .map(|()| (owner, batch))
        });
    }

    let mut winners = Vec::new();
    while let Some(result) = tasks.join_next().await {
        if let Ok(won) = result.unwrap() {
            winners.push(won);
        }
    }

    // Every pair shares "y", so exactly one batch can win.
    assert_eq!(winners.len(), 1);
    let (owner, batch) = &winners[0];
    for id in &ids {
        let row = store.raw(*id).unwrap();
        if batch.contains(id) {
            assert_eq!(row.entity_id, Some(*owner));
        } else {
            assert!(row.is_temp());
        }
    }
}
