//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效编排器。
//!
//! 每个周期依次执行 Identify → Generate → Evict → Commit。Commit 只在 Evict 成功之后运行；
//! 任何阶段失败都会中止周期且不提交，相同的实体在下一个周期中仍然到期（至少一次）。
//!
//! 分批模式把周期拆成两半：`stage` 把模式连同来源变更写入持久队列，
//! `drain` 认领批次、驱逐、删除队列行，然后提交不再有任何队列行的变更。
//! 来源在驱逐之前从不提交；认领失败的批次留在队列中时，相同的变更在下一个周期仍然到期。

use super::evictor::CacheEvictor;
use super::queue::{Batch, BatchInfo, BatchQueue, StagedPattern};
use super::source::{DueEntitySource, DueRequest};
use crate::catalog::ChangeRecord;
use crate::config::InvalidationMode;
use crate::error::{CacheError, CyclePhase, Result};
use crate::metrics::GLOBAL_METRICS;
use crate::pattern::{ConcretePattern, LocaleExpander, PatternGenerator};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// 一个周期的摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub mode: InvalidationMode,
    /// 变更的实体类型；混合类型时为 `catalog`
    pub target: String,
    /// 识别到的变更数
    pub identified: usize,
    /// 交给驱逐器的具体模式数
    pub patterns: usize,
    /// 删除的缓存键数
    pub deleted: u64,
    /// 本周期处理的批次（仅分批模式）
    pub batch_ids: Vec<String>,
}

impl CycleReport {
    fn empty(mode: InvalidationMode) -> Self {
        Self {
            mode,
            target: "catalog".to_string(),
            identified: 0,
            patterns: 0,
            deleted: 0,
            batch_ids: Vec::new(),
        }
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.identified == 0 {
            write!(f, "{} key(s) deleted", self.deleted)
        } else {
            write!(
                f,
                "{} key(s) deleted for {} {} change(s)",
                self.deleted, self.identified, self.target
            )
        }
    }
}

/// `stage` 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub target: String,
    pub identified: usize,
    /// 去重后的具体模式数
    pub patterns: usize,
    /// 写入队列的行数
    pub enqueued: u64,
}

/// `drain`、`retry_batch` 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub batch_ids: Vec<String>,
    pub patterns: usize,
    pub deleted: u64,
}

impl fmt::Display for DrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} key(s) deleted from {} batch(es)",
            self.deleted,
            self.batch_ids.len()
        )
    }
}

/// 变更集合的目标描述
fn target_of(records: &[ChangeRecord]) -> String {
    let kinds: BTreeSet<_> = records.iter().map(|r| r.entity.kind).collect();
    match kinds.len() {
        1 => kinds
            .iter()
            .next()
            .map(|k| k.as_str().to_string())
            .unwrap_or_else(|| "catalog".to_string()),
        _ => "catalog".to_string(),
    }
}

/// 失效编排器
///
/// 所有协作者都在构造时注入，生命周期由入口点负责。
#[derive(Clone)]
pub struct InvalidationOrchestrator {
    source: Arc<dyn DueEntitySource>,
    generator: PatternGenerator,
    expander: LocaleExpander,
    evictor: CacheEvictor,
    queue: Option<BatchQueue>,
    batch_size: u64,
    service_name: String,
}

impl InvalidationOrchestrator {
    /// 创建直接模式的编排器
    pub fn new(
        source: Arc<dyn DueEntitySource>,
        generator: PatternGenerator,
        expander: LocaleExpander,
        evictor: CacheEvictor,
    ) -> Self {
        Self {
            source,
            generator,
            expander,
            evictor,
            queue: None,
            batch_size: 1000,
            service_name: "pilotcache".to_string(),
        }
    }

    /// 切换到分批模式
    pub fn with_queue(mut self, queue: BatchQueue, batch_size: u64) -> Self {
        self.queue = Some(queue);
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn mode(&self) -> InvalidationMode {
        if self.queue.is_some() {
            InvalidationMode::Staged
        } else {
            InvalidationMode::Direct
        }
    }

    pub fn expander(&self) -> &LocaleExpander {
        &self.expander
    }

    pub fn evictor(&self) -> &CacheEvictor {
        &self.evictor
    }

    fn queue(&self) -> Result<&BatchQueue> {
        self.queue.as_ref().ok_or_else(|| {
            CacheError::ConfigError(
                "staged operations require invalidation.mode = \"staged\"".to_string(),
            )
        })
    }

    /// 运行一个完整周期
    ///
    /// 分批模式下等价于 `stage` 之后 `drain`。
    #[instrument(skip(self), level = "debug", fields(mode = %self.mode()))]
    pub async fn run_cycle(&self, request: DueRequest) -> Result<CycleReport> {
        let started = Instant::now();
        let mode = self.mode();
        let result = match mode {
            InvalidationMode::Direct => self.run_direct(request).await,
            InvalidationMode::Staged => self.run_staged(request).await,
        };
        let outcome = if result.is_ok() { "ok" } else { "error" };
        GLOBAL_METRICS.record_cycle(mode.as_str(), outcome, started.elapsed().as_secs_f64());

        match &result {
            Ok(report) => info!(
                mode = %mode,
                identified = report.identified,
                patterns = report.patterns,
                deleted = report.deleted,
                "Invalidation cycle finished: {}",
                report
            ),
            Err(e) => warn!(
                mode = %mode,
                phase = ?e.phase(),
                retryable = e.is_retryable(),
                "Invalidation cycle aborted: {}",
                e
            ),
        }
        result
    }

    async fn identify(&self, request: DueRequest) -> Result<Vec<ChangeRecord>> {
        let records = self
            .source
            .due(request)
            .await
            .map_err(|e| CacheError::aborted(CyclePhase::Identify, e))?;
        info!(
            phase = %CyclePhase::Identify,
            source = self.source.name(),
            identified = records.len(),
            "Identified due changes"
        );
        Ok(records)
    }

    async fn commit(&self, records: &[ChangeRecord]) -> Result<u64> {
        let committed = self
            .source
            .commit(records)
            .await
            .map_err(|e| CacheError::aborted(CyclePhase::Commit, e))?;
        info!(
            phase = %CyclePhase::Commit,
            source = self.source.name(),
            committed,
            "Committed processed changes"
        );
        Ok(committed)
    }

    async fn run_direct(&self, request: DueRequest) -> Result<CycleReport> {
        let mode = InvalidationMode::Direct;
        let records = self.identify(request).await?;
        if records.is_empty() {
            return Ok(CycleReport::empty(mode));
        }
        GLOBAL_METRICS.record_identified(mode.as_str(), records.len() as u64);

        let map = self
            .generator
            .generate(&records)
            .await
            .map_err(|e| CacheError::aborted(CyclePhase::Generate, e))?;
        let abstract_patterns = PatternGenerator::flatten(&map);
        let patterns = self.expander.expand_all(abstract_patterns.iter());
        GLOBAL_METRICS.record_patterns(mode.as_str(), patterns.len() as u64);
        info!(
            phase = %CyclePhase::Generate,
            abstract_patterns = abstract_patterns.len(),
            patterns = patterns.len(),
            "Generated invalidation patterns"
        );

        let outcome = self
            .evictor
            .evict(&patterns)
            .await
            .map_err(|e| CacheError::aborted(CyclePhase::Evict, e))?;
        GLOBAL_METRICS.record_deleted("cycle", outcome.deleted);
        info!(
            phase = %CyclePhase::Evict,
            matched = outcome.matched,
            deleted = outcome.deleted,
            "Evicted cache keys"
        );

        self.commit(&records).await?;

        Ok(CycleReport {
            mode,
            target: target_of(&records),
            identified: records.len(),
            patterns: patterns.len(),
            deleted: outcome.deleted,
            batch_ids: Vec::new(),
        })
    }

    async fn run_staged(&self, request: DueRequest) -> Result<CycleReport> {
        let staged = self.stage(request).await?;
        let drained = self.drain().await?;
        Ok(CycleReport {
            mode: InvalidationMode::Staged,
            target: staged.target,
            identified: staged.identified,
            patterns: staged.patterns,
            deleted: drained.deleted,
            batch_ids: drained.batch_ids,
        })
    }

    /// 识别、生成、展开并写入队列
    ///
    /// 来源不在这里提交。仍有未认领行的变更不会重复入队；
    /// 已被认领的变更会再次入队，重复驱逐是幂等的。
    /// 没有生成任何模式的变更没有需要驱逐的键，直接提交。
    #[instrument(skip(self), level = "debug")]
    pub async fn stage(&self, request: DueRequest) -> Result<StageReport> {
        let queue = self.queue()?;
        let records = self.identify(request).await?;
        if records.is_empty() {
            return Ok(StageReport {
                target: "catalog".to_string(),
                ..Default::default()
            });
        }
        GLOBAL_METRICS.record_identified("staged", records.len() as u64);

        let map = self
            .generator
            .generate(&records)
            .await
            .map_err(|e| CacheError::aborted(CyclePhase::Generate, e))?;
        let pending = queue
            .queued_changes(&records, true)
            .await
            .map_err(|e| CacheError::aborted(CyclePhase::Stage, e))?;

        let mut items: BTreeSet<StagedPattern> = BTreeSet::new();
        let mut nothing_to_evict = Vec::new();
        for record in &records {
            let patterns = match map.get(&record.entity) {
                Some(patterns) if !patterns.is_empty() => patterns,
                _ => {
                    nothing_to_evict.push(record.clone());
                    continue;
                }
            };
            for pattern in self.expander.expand_all(patterns.iter()) {
                items.insert(StagedPattern {
                    pattern,
                    change: record.clone(),
                });
            }
        }
        let distinct = items
            .iter()
            .map(|i| &i.pattern)
            .collect::<BTreeSet<&ConcretePattern>>()
            .len();
        GLOBAL_METRICS.record_patterns("staged", distinct as u64);

        let items: Vec<StagedPattern> = items
            .into_iter()
            .filter(|item| !pending.contains(&item.change))
            .collect();
        let enqueued = queue
            .enqueue(&items)
            .await
            .map_err(|e| CacheError::aborted(CyclePhase::Stage, e))?;
        info!(
            phase = %CyclePhase::Stage,
            patterns = distinct,
            enqueued,
            already_pending = pending.len(),
            "Staged invalidation patterns"
        );

        if !nothing_to_evict.is_empty() {
            self.commit(&nothing_to_evict).await?;
        }
        self.refresh_queue_depth(queue).await;

        Ok(StageReport {
            target: target_of(&records),
            identified: records.len(),
            patterns: distinct,
            enqueued,
        })
    }

    /// 认领并处理批次，直到没有未认领的行
    ///
    /// 驱逐失败时批次保持认领状态并返回错误；需要通过 `retry_batch` 或
    /// `release_batch` 显式处理。
    #[instrument(skip(self), level = "debug")]
    pub async fn drain(&self) -> Result<DrainReport> {
        let queue = self.queue()?;
        let mut report = DrainReport::default();
        loop {
            let batch = queue
                .claim(self.batch_size)
                .await
                .map_err(|e| CacheError::aborted(CyclePhase::Identify, e))?;
            let Some(batch) = batch else {
                break;
            };
            let (patterns, deleted) = self.process_batch(queue, &batch).await?;
            report.patterns += patterns;
            report.deleted += deleted;
            report.batch_ids.push(batch.id);
        }
        self.refresh_queue_depth(queue).await;
        Ok(report)
    }

    async fn process_batch(&self, queue: &BatchQueue, batch: &Batch) -> Result<(usize, u64)> {
        let patterns = batch.patterns();
        let outcome = match self.evictor.evict(&patterns).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    batch_id = %batch.id,
                    "Eviction failed, batch stays claimed until retried or released: {}",
                    e
                );
                return Err(CacheError::aborted(CyclePhase::Evict, e));
            }
        };
        GLOBAL_METRICS.record_deleted("cycle", outcome.deleted);
        info!(
            phase = %CyclePhase::Evict,
            batch_id = %batch.id,
            patterns = patterns.len(),
            deleted = outcome.deleted,
            "Evicted batch"
        );

        let removed = queue
            .complete(&batch.id)
            .await
            .map_err(|e| CacheError::aborted(CyclePhase::Commit, e))?;
        info!(
            phase = %CyclePhase::Commit,
            batch_id = %batch.id,
            removed,
            "Completed batch"
        );

        // 同一变更的其他行还在队列中时（另一个批次或未认领），该变更保持到期
        let changes = batch.changes();
        let outstanding = queue
            .queued_changes(&changes, false)
            .await
            .map_err(|e| CacheError::aborted(CyclePhase::Commit, e))?;
        let settled: Vec<ChangeRecord> = changes
            .into_iter()
            .filter(|c| !outstanding.contains(c))
            .collect();
        if !settled.is_empty() {
            self.commit(&settled).await?;
        }
        Ok((patterns.len(), outcome.deleted))
    }

    /// 重新驱逐一个进行中的批次，然后完成它
    #[instrument(skip(self), level = "debug")]
    pub async fn retry_batch(&self, batch_id: &str) -> Result<DrainReport> {
        let queue = self.queue()?;
        let entries = queue
            .entries(batch_id)
            .await
            .map_err(|e| CacheError::aborted(CyclePhase::Identify, e))?;
        if entries.is_empty() {
            return Err(CacheError::BatchNotFound(batch_id.to_string()));
        }
        let batch = Batch {
            id: batch_id.to_string(),
            entries,
        };
        let (patterns, deleted) = self.process_batch(queue, &batch).await?;
        self.refresh_queue_depth(queue).await;
        Ok(DrainReport {
            batch_ids: vec![batch.id],
            patterns,
            deleted,
        })
    }

    /// 把崩溃进程遗留的批次放回未认领状态
    #[instrument(skip(self), level = "debug")]
    pub async fn release_batch(&self, batch_id: &str) -> Result<u64> {
        let queue = self.queue()?;
        let released = queue.release(batch_id).await?;
        self.refresh_queue_depth(queue).await;
        Ok(released)
    }

    pub async fn in_flight_batches(&self) -> Result<Vec<BatchInfo>> {
        self.queue()?.in_flight_batches().await
    }

    pub async fn pending_count(&self) -> Result<u64> {
        self.queue()?.pending_count().await
    }

    async fn refresh_queue_depth(&self, queue: &BatchQueue) {
        match queue.pending_count().await {
            Ok(depth) => GLOBAL_METRICS.set_queue_depth(&self.service_name, depth),
            Err(e) => warn!("Failed to read queue depth: {}", e),
        }
    }
}
