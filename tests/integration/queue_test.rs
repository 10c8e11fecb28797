//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 批次队列集成测试：并发认领、释放与完成

#[path = "../common/mod.rs"]
mod common;

use common::{memory_db, setup_logging};
use pilotcache::catalog::{ChangeRecord, EntityRef};
use pilotcache::pattern::{ConcretePattern, Endpoint, Locale, MatchExpr};
use pilotcache::sync::{BatchQueue, StagedPattern};
use std::collections::BTreeSet;

fn staged(n: i64) -> Vec<StagedPattern> {
    (0..n)
        .map(|id| StagedPattern {
            pattern: ConcretePattern::new(
                Endpoint::SingleProduct,
                MatchExpr::id(id),
                Locale::new("en").unwrap(),
            ),
            change: ChangeRecord::new(EntityRef::product(id), 1000),
        })
        .collect()
}

#[tokio::test]
async fn test_concurrent_claims_partition_the_queue() {
    setup_logging();
    let queue = BatchQueue::new(memory_db().await);
    queue.enqueue(&staged(40)).await.unwrap();

    let (first, second) = tokio::join!(queue.claim(25), queue.claim(25));
    let first = first.unwrap().expect("first batch");
    let second = second.unwrap().expect("second batch");
    assert_ne!(first.id, second.id);

    let a: BTreeSet<i64> = first.entries.iter().map(|e| e.id).collect();
    let b: BTreeSet<i64> = second.entries.iter().map(|e| e.id).collect();
    assert!(a.is_disjoint(&b));
    assert_eq!(a.len() + b.len(), 40);
    assert!(queue.claim(25).await.unwrap().is_none());
}

#[tokio::test]
async fn test_in_flight_batches_and_release() {
    setup_logging();
    let queue = BatchQueue::new(memory_db().await);
    queue.enqueue(&staged(5)).await.unwrap();

    let batch = queue.claim(3).await.unwrap().expect("batch");
    let in_flight = queue.in_flight_batches().await.unwrap();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].batch_id, batch.id);
    assert_eq!(in_flight[0].entries, 3);
    assert_eq!(queue.pending_count().await.unwrap(), 2);

    assert_eq!(queue.release(&batch.id).await.unwrap(), 3);
    assert!(queue.in_flight_batches().await.unwrap().is_empty());
    assert_eq!(queue.pending_count().await.unwrap(), 5);

    assert!(queue.release(&batch.id).await.is_err());
}

#[tokio::test]
async fn test_complete_removes_only_the_batch() {
    setup_logging();
    let queue = BatchQueue::new(memory_db().await);
    queue.enqueue(&staged(6)).await.unwrap();

    let batch = queue.claim(4).await.unwrap().expect("batch");
    assert_eq!(batch.patterns().len(), 4);
    assert_eq!(queue.complete(&batch.id).await.unwrap(), 4);
    assert!(queue.entries(&batch.id).await.unwrap().is_empty());
    assert_eq!(queue.pending_count().await.unwrap(), 2);
}
