//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 编排器端到端测试：直接模式与分批模式的完整周期

#[path = "../common/mod.rs"]
mod common;

use async_trait::async_trait;
use common::{memory_cache, memory_db, orchestrator, seed_scenario_a, setup_logging};
use pilotcache::backend::{KeyValueCache, MemoryCache};
use pilotcache::catalog::{ChangeRecord, EntityRef};
use pilotcache::config::InvalidationMode;
use pilotcache::error::{CacheError, CyclePhase, Result};
use pilotcache::sync::{
    BatchQueue, ChangeLogSource, DueEntitySource, DueRequest, WatermarkSource,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SCENARIO_KEYS: &[&str] = &[
    "/single_product:500:en",
    "/product_listing:3:fr",
    "/single_product:501:en",
    "/product_listing:12:en",
];

/// 提交阶段可以被打断的来源
struct InterruptedCommit {
    inner: WatermarkSource,
    fail: AtomicBool,
}

#[async_trait]
impl DueEntitySource for InterruptedCommit {
    fn name(&self) -> &'static str {
        "interrupted"
    }

    async fn due(&self, request: DueRequest) -> Result<Vec<ChangeRecord>> {
        self.inner.due(request).await
    }

    async fn commit(&self, records: &[ChangeRecord]) -> Result<u64> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CacheError::DatabaseError("connection lost during commit".to_string()));
        }
        self.inner.commit(records).await
    }
}

/// 可以切换为不可达的缓存
struct FlakyCache {
    inner: MemoryCache,
    down: AtomicBool,
}

#[async_trait]
impl KeyValueCache for FlakyCache {
    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::BackendError("connection refused".to_string()));
        }
        self.inner.list_keys(pattern).await
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64> {
        self.inner.delete_keys(keys).await
    }
}

#[tokio::test]
async fn test_direct_cycle_end_to_end() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;
    let cache = memory_cache(SCENARIO_KEYS);

    let orchestrator = orchestrator(
        db.clone(),
        Arc::new(WatermarkSource::new(db.clone())),
        Arc::new(cache.clone()),
    );
    assert_eq!(orchestrator.mode(), InvalidationMode::Direct);

    let report = orchestrator.run_cycle(DueRequest::new(500)).await.unwrap();
    assert_eq!(report.identified, 1);
    assert_eq!(report.patterns, 8);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.to_string(), "2 key(s) deleted for 1 product change(s)");

    assert!(!cache.contains("/single_product:500:en"));
    assert!(!cache.contains("/product_listing:3:fr"));
    assert!(cache.contains("/single_product:501:en"));
    assert!(cache.contains("/product_listing:12:en"));

    // 水位线已推进，下一周期没有到期实体
    let next = orchestrator.run_cycle(DueRequest::new(500)).await.unwrap();
    assert_eq!(next.identified, 0);
    assert_eq!(next.to_string(), "0 key(s) deleted");
}

#[tokio::test]
async fn test_empty_due_set_does_not_touch_cache() {
    setup_logging();
    let db = memory_db().await;
    let cache = memory_cache(SCENARIO_KEYS);
    let orchestrator = orchestrator(
        db.clone(),
        Arc::new(WatermarkSource::new(db.clone())),
        Arc::new(cache.clone()),
    );

    let report = orchestrator.run_cycle(DueRequest::new(500)).await.unwrap();
    assert_eq!(report.to_string(), "0 key(s) deleted");
    assert_eq!(cache.list_calls(), 0);
    assert_eq!(cache.delete_calls(), 0);
}

#[tokio::test]
async fn test_interrupted_commit_reprocesses_entities() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;
    let cache = memory_cache(SCENARIO_KEYS);
    let source = Arc::new(InterruptedCommit {
        inner: WatermarkSource::new(db.clone()),
        fail: AtomicBool::new(true),
    });
    let orchestrator = orchestrator(db.clone(), source.clone(), Arc::new(cache.clone()));

    let err = orchestrator.run_cycle(DueRequest::new(500)).await.unwrap_err();
    assert_eq!(err.phase(), Some(CyclePhase::Commit));
    assert!(err.is_retryable());
    assert!(!cache.contains("/single_product:500:en"));

    source.fail.store(false, Ordering::SeqCst);
    let report = orchestrator.run_cycle(DueRequest::new(500)).await.unwrap();
    assert_eq!(report.identified, 1);
    assert_eq!(report.deleted, 0);

    let after = orchestrator.run_cycle(DueRequest::new(500)).await.unwrap();
    assert_eq!(after.identified, 0);
}

#[tokio::test]
async fn test_unreachable_cache_leaves_entities_due() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;
    let cache = Arc::new(FlakyCache {
        inner: memory_cache(SCENARIO_KEYS),
        down: AtomicBool::new(true),
    });
    let orchestrator = orchestrator(
        db.clone(),
        Arc::new(WatermarkSource::new(db.clone())),
        cache.clone(),
    );

    let err = orchestrator.run_cycle(DueRequest::new(500)).await.unwrap_err();
    assert_eq!(err.phase(), Some(CyclePhase::Evict));

    cache.down.store(false, Ordering::SeqCst);
    let report = orchestrator.run_cycle(DueRequest::new(500)).await.unwrap();
    assert_eq!(report.identified, 1);
    assert_eq!(report.deleted, 2);
}

#[tokio::test]
async fn test_staged_cycle_end_to_end() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;
    let cache = memory_cache(SCENARIO_KEYS);
    let source = ChangeLogSource::new(db.clone());
    source.record(&[EntityRef::product(500)]).await.unwrap();

    let orchestrator = orchestrator(db.clone(), Arc::new(source.clone()), Arc::new(cache.clone()))
        .with_queue(BatchQueue::new(db.clone()), 1000);
    assert_eq!(orchestrator.mode(), InvalidationMode::Staged);

    let report = orchestrator.run_cycle(DueRequest::new(500)).await.unwrap();
    assert_eq!(report.mode, InvalidationMode::Staged);
    assert_eq!(report.identified, 1);
    assert_eq!(report.patterns, 8);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.batch_ids.len(), 1);

    assert_eq!(orchestrator.pending_count().await.unwrap(), 0);
    assert!(orchestrator.in_flight_batches().await.unwrap().is_empty());
    assert!(source.due(DueRequest::new(500)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_staged_watermark_cycle_recovers_after_cache_outage() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;
    let cache = Arc::new(FlakyCache {
        inner: memory_cache(SCENARIO_KEYS),
        down: AtomicBool::new(true),
    });
    let source = WatermarkSource::new(db.clone());
    let orchestrator = orchestrator(db.clone(), Arc::new(source.clone()), cache.clone())
        .with_queue(BatchQueue::new(db.clone()), 1000);

    let err = orchestrator.run_cycle(DueRequest::new(500)).await.unwrap_err();
    assert_eq!(err.phase(), Some(CyclePhase::Evict));
    // 驱逐失败后水位线保持不变
    assert_eq!(source.due(DueRequest::new(500)).await.unwrap().len(), 1);
    assert!(cache.inner.contains("/single_product:500:en"));

    cache.down.store(false, Ordering::SeqCst);
    let report = orchestrator.run_cycle(DueRequest::new(500)).await.unwrap();
    assert_eq!(report.identified, 1);
    assert_eq!(report.deleted, 2);
    assert!(!cache.inner.contains("/single_product:500:en"));
    assert!(!cache.inner.contains("/product_listing:3:fr"));

    // 失败的批次仍持有该变更的行，变更保持到期直到批次被处理
    assert_eq!(source.due(DueRequest::new(500)).await.unwrap().len(), 1);
    let stuck = orchestrator.in_flight_batches().await.unwrap();
    assert_eq!(stuck.len(), 1);

    let retried = orchestrator.retry_batch(&stuck[0].batch_id).await.unwrap();
    assert_eq!(retried.deleted, 0);
    assert!(source.due(DueRequest::new(500)).await.unwrap().is_empty());
    assert_eq!(orchestrator.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_staging_twice_does_not_duplicate_pending_rows() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;
    let cache = memory_cache(SCENARIO_KEYS);
    let source = WatermarkSource::new(db.clone());
    let orchestrator = orchestrator(db.clone(), Arc::new(source.clone()), Arc::new(cache.clone()))
        .with_queue(BatchQueue::new(db.clone()), 3);

    let first = orchestrator.stage(DueRequest::new(500)).await.unwrap();
    assert_eq!(first.enqueued, 8);
    let second = orchestrator.stage(DueRequest::new(500)).await.unwrap();
    assert_eq!(second.identified, 1);
    assert_eq!(second.enqueued, 0);
    assert!(cache.contains("/single_product:500:en"));

    // 批次大小3：变更在最后一个批次完成后才提交
    let drained = orchestrator.drain().await.unwrap();
    assert_eq!(drained.batch_ids.len(), 3);
    assert_eq!(drained.deleted, 2);
    assert!(source.due(DueRequest::new(500)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_batch_stays_claimed_until_retried() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;
    let cache = Arc::new(FlakyCache {
        inner: memory_cache(SCENARIO_KEYS),
        down: AtomicBool::new(true),
    });
    let source = ChangeLogSource::new(db.clone());
    source.record(&[EntityRef::product(500)]).await.unwrap();

    let orchestrator = orchestrator(db.clone(), Arc::new(source), cache.clone())
        .with_queue(BatchQueue::new(db.clone()), 1000);

    let staged = orchestrator.stage(DueRequest::new(500)).await.unwrap();
    assert_eq!(staged.patterns, 8);
    assert_eq!(staged.enqueued, 8);

    let err = orchestrator.drain().await.unwrap_err();
    assert_eq!(err.phase(), Some(CyclePhase::Evict));

    let in_flight = orchestrator.in_flight_batches().await.unwrap();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].entries, 8);

    // 认领中的行不会被下一次 drain 重新处理
    cache.down.store(false, Ordering::SeqCst);
    let drained = orchestrator.drain().await.unwrap();
    assert!(drained.batch_ids.is_empty());

    let retried = orchestrator.retry_batch(&in_flight[0].batch_id).await.unwrap();
    assert_eq!(retried.deleted, 2);
    assert!(orchestrator.in_flight_batches().await.unwrap().is_empty());

    let missing = orchestrator.retry_batch(&in_flight[0].batch_id).await.unwrap_err();
    assert!(matches!(missing, CacheError::BatchNotFound(_)));
}

#[tokio::test]
async fn test_released_batch_is_drained_again() {
    setup_logging();
    let db = memory_db().await;
    seed_scenario_a(&db).await;
    let cache = Arc::new(FlakyCache {
        inner: memory_cache(SCENARIO_KEYS),
        down: AtomicBool::new(true),
    });
    let source = ChangeLogSource::new(db.clone());
    source.record(&[EntityRef::product(500)]).await.unwrap();
    let orchestrator = orchestrator(db.clone(), Arc::new(source), cache.clone())
        .with_queue(BatchQueue::new(db.clone()), 1000);

    orchestrator.stage(DueRequest::new(500)).await.unwrap();
    assert!(orchestrator.drain().await.is_err());
    let batch_id = orchestrator.in_flight_batches().await.unwrap()[0].batch_id.clone();

    assert_eq!(orchestrator.release_batch(&batch_id).await.unwrap(), 8);
    assert_eq!(orchestrator.pending_count().await.unwrap(), 8);

    cache.down.store(false, Ordering::SeqCst);
    let drained = orchestrator.drain().await.unwrap();
    assert_eq!(drained.batch_ids.len(), 1);
    assert_ne!(drained.batch_ids[0], batch_id);
    assert_eq!(drained.deleted, 2);
}
