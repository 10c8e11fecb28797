//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了分批模式的持久队列。
//!
//! 队列是无序的多重集合，每行保存一个具体模式及其来源变更。
//! `batch_id` 为空表示尚未被认领。

use crate::catalog::{ChangeRecord, EntityKind, EntityRef};
use crate::database::{int_values, now_millis, placeholder, placeholders, text_value, IN_CHUNK};
use crate::error::{CacheError, Result};
use crate::pattern::ConcretePattern;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, QueryResult, Statement,
    TransactionTrait, Value,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const QUEUE_TABLE: &str = "cache_invalidation_queue";

/// 单条 INSERT 携带的最大行数（每行6个参数）
const INSERT_CHUNK: usize = 100;

/// 每行的参数个数
const INSERT_COLUMNS: usize = 6;

/// 待入队的模式及其来源变更
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StagedPattern {
    pub pattern: ConcretePattern,
    pub change: ChangeRecord,
}

/// 队列中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: i64,
    pub pattern: ConcretePattern,
    pub change: ChangeRecord,
    pub enqueued_at: i64,
}

/// 已认领的批次
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: String,
    pub entries: Vec<QueueEntry>,
}

impl Batch {
    /// 批次中去重后的模式
    pub fn patterns(&self) -> std::collections::BTreeSet<ConcretePattern> {
        self.entries.iter().map(|e| e.pattern.clone()).collect()
    }

    /// 批次覆盖的来源变更
    pub fn changes(&self) -> Vec<ChangeRecord> {
        self.entries
            .iter()
            .map(|e| e.change.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// 进行中批次的概要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInfo {
    pub batch_id: String,
    pub entries: u64,
    /// 认领时间（毫秒时间戳）
    pub claimed_at: i64,
}

/// 持久批次队列
#[derive(Clone)]
pub struct BatchQueue {
    db: Arc<DatabaseConnection>,
}

impl BatchQueue {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn backend(&self) -> DatabaseBackend {
        self.db.get_database_backend()
    }

    /// 写入待驱逐的模式
    ///
    /// 所有行在同一个事务中写入。
    #[instrument(skip(self, items), level = "debug", fields(count = items.len()))]
    pub async fn enqueue(&self, items: &[StagedPattern]) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }
        let backend = self.backend();
        let enqueued_at = now_millis();

        let txn = self.db.begin().await?;
        let mut inserted = 0u64;
        for chunk in items.chunks(INSERT_CHUNK) {
            let mut rows = Vec::with_capacity(chunk.len());
            let mut values: Vec<Value> = Vec::with_capacity(chunk.len() * INSERT_COLUMNS);
            for (i, item) in chunk.iter().enumerate() {
                rows.push(format!(
                    "({})",
                    placeholders(backend, i * INSERT_COLUMNS + 1, INSERT_COLUMNS)
                ));
                values.push(text_value(&item.pattern.to_string()));
                values.push(text_value(item.change.entity.kind.as_str()));
                values.push(Value::BigInt(Some(item.change.entity.id)));
                values.push(Value::BigInt(Some(item.change.changed_at)));
                values.push(Value::BigInt(item.change.change_id));
                values.push(Value::BigInt(Some(enqueued_at)));
            }
            let sql = format!(
                "INSERT INTO {} \
                 (pattern, entity_kind, entity_id, changed_at, change_id, enqueued_at) VALUES {}",
                QUEUE_TABLE,
                rows.join(", ")
            );
            let res = txn
                .execute(Statement::from_sql_and_values(backend, &sql, values))
                .await?;
            inserted += res.rows_affected();
        }
        txn.commit().await?;

        debug!("Enqueued {} pattern(s)", inserted);
        Ok(inserted)
    }

    /// 认领最多 `limit` 条未认领的行
    ///
    /// 被其他批次认领的行不会被再次认领；两个并发的认领操作会划分队列。
    /// PostgreSQL 和 MySQL 跳过其他认领已锁定的行，不会因为等锁而认领到0行。
    /// 队列为空时返回 `None`。
    #[instrument(skip(self), level = "debug")]
    pub async fn claim(&self, limit: u64) -> Result<Option<Batch>> {
        let batch_id = Uuid::new_v4().to_string();
        let claimed_at = now_millis();
        let limit = i64::try_from(limit)
            .map_err(|_| CacheError::InvalidInput(format!("batch size {} is too large", limit)))?;

        let claimed = match self.backend() {
            DatabaseBackend::MySql => self.claim_locked_ids(&batch_id, claimed_at, limit).await?,
            backend => {
                let res = self
                    .db
                    .execute(Statement::from_sql_and_values(
                        backend,
                        &claim_sql(backend),
                        [
                            text_value(&batch_id),
                            Value::BigInt(Some(claimed_at)),
                            Value::BigInt(Some(limit)),
                        ],
                    ))
                    .await?;
                res.rows_affected()
            }
        };

        if claimed == 0 {
            debug!("No unclaimed queue entries");
            return Ok(None);
        }

        let entries = self.entries(&batch_id).await?;
        info!(
            batch_id = %batch_id,
            entries = entries.len(),
            "Claimed invalidation batch"
        );
        Ok(Some(Batch {
            id: batch_id,
            entries,
        }))
    }

    /// MySQL 的 UPDATE 不支持 SKIP LOCKED：先在事务中锁定行，再按ID认领
    async fn claim_locked_ids(&self, batch_id: &str, claimed_at: i64, limit: i64) -> Result<u64> {
        let backend = self.backend();
        let txn = self.db.begin().await?;
        let select = format!(
            "SELECT id FROM {} WHERE batch_id IS NULL ORDER BY id LIMIT ? FOR UPDATE SKIP LOCKED",
            QUEUE_TABLE
        );
        let rows = txn
            .query_all(Statement::from_sql_and_values(
                backend,
                &select,
                [Value::BigInt(Some(limit))],
            ))
            .await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get::<i64>("", "id")?);
        }

        let mut claimed = 0u64;
        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!(
                "UPDATE {} SET batch_id = ?, claimed_at = ? WHERE batch_id IS NULL AND id IN ({})",
                QUEUE_TABLE,
                placeholders(backend, 3, chunk.len())
            );
            let mut values = vec![text_value(batch_id), Value::BigInt(Some(claimed_at))];
            values.extend(int_values(chunk));
            let res = txn
                .execute(Statement::from_sql_and_values(backend, &sql, values))
                .await?;
            claimed += res.rows_affected();
        }
        txn.commit().await?;
        Ok(claimed)
    }

    /// 批次中的所有行
    #[instrument(skip(self), level = "debug")]
    pub async fn entries(&self, batch_id: &str) -> Result<Vec<QueueEntry>> {
        let backend = self.backend();
        let sql = format!(
            "SELECT id, pattern, entity_kind, entity_id, changed_at, change_id, enqueued_at \
             FROM {} WHERE batch_id = {} ORDER BY id",
            QUEUE_TABLE,
            placeholder(backend, 1)
        );
        let rows = self
            .db
            .query_all(Statement::from_sql_and_values(
                backend,
                &sql,
                [text_value(batch_id)],
            ))
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_entry(&row) {
                Ok(entry) => entries.push(entry),
                // 无法解析的行随批次完成一起删除
                Err(e) => warn!("Skipping malformed queue row in batch {}: {}", batch_id, e),
            }
        }
        Ok(entries)
    }

    /// 所有进行中的批次，按认领时间排序
    #[instrument(skip(self), level = "debug")]
    pub async fn in_flight_batches(&self) -> Result<Vec<BatchInfo>> {
        let backend = self.backend();
        let sql = format!(
            "SELECT batch_id, COUNT(*) AS entries, MIN(claimed_at) AS claimed_at FROM {} \
             WHERE batch_id IS NOT NULL GROUP BY batch_id ORDER BY claimed_at, batch_id",
            QUEUE_TABLE
        );
        let rows = self
            .db
            .query_all(Statement::from_string(backend, sql))
            .await?;

        let mut batches = Vec::with_capacity(rows.len());
        for row in rows {
            let batch_id: String = row.try_get("", "batch_id")?;
            let entries: i64 = row.try_get("", "entries")?;
            let claimed_at: Option<i64> = row.try_get("", "claimed_at")?;
            batches.push(BatchInfo {
                batch_id,
                entries: entries.max(0) as u64,
                claimed_at: claimed_at.unwrap_or_default(),
            });
        }
        Ok(batches)
    }

    /// 驱逐成功后删除批次的所有行
    #[instrument(skip(self), level = "debug")]
    pub async fn complete(&self, batch_id: &str) -> Result<u64> {
        let backend = self.backend();
        let sql = format!(
            "DELETE FROM {} WHERE batch_id = {}",
            QUEUE_TABLE,
            placeholder(backend, 1)
        );
        let res = self
            .db
            .execute(Statement::from_sql_and_values(
                backend,
                &sql,
                [text_value(batch_id)],
            ))
            .await?;
        debug!("Completed batch {}: {} row(s) removed", batch_id, res.rows_affected());
        Ok(res.rows_affected())
    }

    /// 把批次的行放回未认领状态
    ///
    /// 用于恢复所属进程已崩溃的批次。批次不存在时返回 `BatchNotFound`。
    #[instrument(skip(self), level = "debug")]
    pub async fn release(&self, batch_id: &str) -> Result<u64> {
        let backend = self.backend();
        let sql = format!(
            "UPDATE {} SET batch_id = NULL, claimed_at = NULL WHERE batch_id = {}",
            QUEUE_TABLE,
            placeholder(backend, 1)
        );
        let res = self
            .db
            .execute(Statement::from_sql_and_values(
                backend,
                &sql,
                [text_value(batch_id)],
            ))
            .await?;
        if res.rows_affected() == 0 {
            return Err(CacheError::BatchNotFound(batch_id.to_string()));
        }
        info!(batch_id = %batch_id, entries = res.rows_affected(), "Released invalidation batch");
        Ok(res.rows_affected())
    }

    /// `changes` 中仍有行留在队列里的那些变更
    ///
    /// `unclaimed_only` 为真时只考虑未认领的行。
    #[instrument(skip(self, changes), level = "debug", fields(count = changes.len()))]
    pub async fn queued_changes(
        &self,
        changes: &[ChangeRecord],
        unclaimed_only: bool,
    ) -> Result<BTreeSet<ChangeRecord>> {
        let ids: Vec<i64> = changes
            .iter()
            .map(|c| c.entity.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let backend = self.backend();
        let mut queued = BTreeSet::new();
        for chunk in ids.chunks(IN_CHUNK) {
            let mut sql = format!(
                "SELECT DISTINCT entity_kind, entity_id, changed_at, change_id FROM {} \
                 WHERE entity_id IN ({})",
                QUEUE_TABLE,
                placeholders(backend, 1, chunk.len())
            );
            if unclaimed_only {
                sql.push_str(" AND batch_id IS NULL");
            }
            let rows = self
                .db
                .query_all(Statement::from_sql_and_values(backend, &sql, int_values(chunk)))
                .await?;
            for row in rows {
                match parse_change(&row) {
                    Ok(change) => {
                        queued.insert(change);
                    }
                    Err(e) => warn!("Skipping malformed queue row: {}", e),
                }
            }
        }
        Ok(changes
            .iter()
            .filter(|c| queued.contains(*c))
            .cloned()
            .collect())
    }

    /// 未认领的行数
    #[instrument(skip(self), level = "debug")]
    pub async fn pending_count(&self) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) AS pending FROM {} WHERE batch_id IS NULL",
            QUEUE_TABLE
        );
        let row = self
            .db
            .query_one(Statement::from_string(self.backend(), sql))
            .await?;
        let pending: i64 = match row {
            Some(row) => row.try_get("", "pending")?,
            None => 0,
        };
        Ok(pending.max(0) as u64)
    }
}

/// 认领语句；PostgreSQL 的子查询跳过已被其他认领锁定的行
fn claim_sql(backend: DatabaseBackend) -> String {
    let lock = match backend {
        DatabaseBackend::Postgres => " FOR UPDATE SKIP LOCKED",
        _ => "",
    };
    format!(
        "UPDATE {t} SET batch_id = {p1}, claimed_at = {p2} \
         WHERE batch_id IS NULL AND id IN \
         (SELECT id FROM {t} WHERE batch_id IS NULL ORDER BY id LIMIT {p3}{lock})",
        t = QUEUE_TABLE,
        p1 = placeholder(backend, 1),
        p2 = placeholder(backend, 2),
        p3 = placeholder(backend, 3),
        lock = lock,
    )
}

fn parse_change(row: &QueryResult) -> Result<ChangeRecord> {
    let kind: String = row.try_get("", "entity_kind")?;
    let entity_id: i64 = row.try_get("", "entity_id")?;
    Ok(ChangeRecord {
        entity: EntityRef::new(kind.parse::<EntityKind>()?, entity_id),
        changed_at: row.try_get("", "changed_at")?,
        change_id: row.try_get("", "change_id")?,
    })
}

fn parse_entry(row: &QueryResult) -> Result<QueueEntry> {
    let id: i64 = row.try_get("", "id")?;
    let pattern: String = row.try_get("", "pattern")?;
    let enqueued_at: i64 = row.try_get("", "enqueued_at")?;
    Ok(QueueEntry {
        id,
        pattern: pattern.parse()?,
        change: parse_change(row)?,
        enqueued_at,
    })
}
