//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了到期变更的来源。
//!
//! 两种来源实现同一个接口，语义互不混合：
//! - 水位线：比较每行的 `modified_at` 与 `cache_updated_at`
//! - 变更日志：读取 `catalog_change_log` 表，提交时删除已读取的行

use crate::catalog::{ChangeRecord, EntityKind, EntityRef};
use crate::database::{int_values, now_millis, placeholder, placeholders, text_value, IN_CHUNK};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement, TransactionTrait, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

const CHANGE_LOG_TABLE: &str = "catalog_change_log";

/// 一次识别请求的边界
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueRequest {
    /// 最多返回的变更数
    pub limit: u64,
    /// 只考虑最近这段时间内的变更（毫秒）
    pub lookback_ms: Option<i64>,
}

impl DueRequest {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            lookback_ms: None,
        }
    }

    pub fn with_lookback_ms(mut self, lookback_ms: i64) -> Self {
        self.lookback_ms = Some(lookback_ms);
        self
    }

    fn since(&self) -> Option<i64> {
        self.lookback_ms.map(|ms| now_millis() - ms)
    }

    fn sql_limit(&self) -> Result<i64> {
        i64::try_from(self.limit)
            .map_err(|_| CacheError::InvalidInput(format!("row limit {} is too large", self.limit)))
    }
}

/// 到期变更来源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DueEntitySource: Send + Sync {
    /// 来源名称，用于日志
    fn name(&self) -> &'static str;

    /// 识别到期的变更，最旧的在前
    async fn due(&self, request: DueRequest) -> Result<Vec<ChangeRecord>>;

    /// 标记这些变更已处理
    ///
    /// 只能在对应的缓存键被驱逐之后调用。
    async fn commit(&self, records: &[ChangeRecord]) -> Result<u64>;
}

/// 基于水位线列的来源
#[derive(Clone)]
pub struct WatermarkSource {
    db: Arc<DatabaseConnection>,
}

impl WatermarkSource {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn due_for_kind(
        &self,
        kind: EntityKind,
        since: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ChangeRecord>> {
        let backend = self.db.get_database_backend();
        let (table, id_column) = kind.table();
        let mut values = Vec::new();
        let mut sql = format!(
            "SELECT {id} AS entity_id, modified_at FROM {table} WHERE modified_at > cache_updated_at",
            id = id_column,
            table = table
        );
        if let Some(since) = since {
            values.push(Value::BigInt(Some(since)));
            sql.push_str(&format!(" AND modified_at >= {}", placeholder(backend, values.len())));
        }
        values.push(Value::BigInt(Some(limit)));
        sql.push_str(&format!(
            " ORDER BY modified_at, {} LIMIT {}",
            id_column,
            placeholder(backend, values.len())
        ));

        let rows = self
            .db
            .query_all(Statement::from_sql_and_values(backend, &sql, values))
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("", "entity_id")?;
            let modified_at: i64 = row.try_get("", "modified_at")?;
            records.push(ChangeRecord::new(EntityRef::new(kind, id), modified_at));
        }
        Ok(records)
    }
}

#[async_trait]
impl DueEntitySource for WatermarkSource {
    fn name(&self) -> &'static str {
        "watermark"
    }

    #[instrument(skip(self), level = "debug")]
    async fn due(&self, request: DueRequest) -> Result<Vec<ChangeRecord>> {
        let limit = request.sql_limit()?;
        let since = request.since();
        let per_kind = try_join_all(
            EntityKind::ALL
                .iter()
                .map(|kind| self.due_for_kind(*kind, since, limit)),
        )
        .await?;

        let mut records: Vec<ChangeRecord> = per_kind.into_iter().flatten().collect();
        records.sort_by(|a, b| {
            a.changed_at
                .cmp(&b.changed_at)
                .then(a.entity.cmp(&b.entity))
        });
        records.truncate(request.limit as usize);
        debug!("Watermark source found {} due change(s)", records.len());
        Ok(records)
    }

    /// 把水位线推进到识别时观察到的 `modified_at`
    ///
    /// 周期运行期间发生的新修改使 `modified_at` 更大，该行保持到期。
    #[instrument(skip(self, records), level = "debug", fields(count = records.len()))]
    async fn commit(&self, records: &[ChangeRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let backend = self.db.get_database_backend();
        let txn = self.db.begin().await?;
        let mut updated = 0u64;
        for record in records {
            let (table, id_column) = record.entity.kind.table();
            let sql = format!(
                "UPDATE {table} SET cache_updated_at = {p1} WHERE {id} = {p2} AND cache_updated_at < {p3}",
                table = table,
                id = id_column,
                p1 = placeholder(backend, 1),
                p2 = placeholder(backend, 2),
                p3 = placeholder(backend, 3),
            );
            let res = txn
                .execute(Statement::from_sql_and_values(
                    backend,
                    &sql,
                    [
                        Value::BigInt(Some(record.changed_at)),
                        Value::BigInt(Some(record.entity.id)),
                        Value::BigInt(Some(record.changed_at)),
                    ],
                ))
                .await?;
            updated += res.rows_affected();
        }
        txn.commit().await?;
        debug!("Advanced {} watermark(s)", updated);
        Ok(updated)
    }
}

/// 基于变更日志表的来源
#[derive(Clone)]
pub struct ChangeLogSource {
    db: Arc<DatabaseConnection>,
}

impl ChangeLogSource {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// 写入变更日志（由数据修改流程调用）
    #[instrument(skip(self, entities), level = "debug", fields(count = entities.len()))]
    pub async fn record(&self, entities: &[EntityRef]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }
        let backend = self.db.get_database_backend();
        let changed_at = now_millis();
        let mut inserted = 0u64;
        for chunk in entities.chunks(IN_CHUNK / 3) {
            let mut rows = Vec::with_capacity(chunk.len());
            let mut values = Vec::with_capacity(chunk.len() * 3);
            for (i, entity) in chunk.iter().enumerate() {
                rows.push(format!("({})", placeholders(backend, i * 3 + 1, 3)));
                values.push(text_value(entity.kind.as_str()));
                values.push(Value::BigInt(Some(entity.id)));
                values.push(Value::BigInt(Some(changed_at)));
            }
            let sql = format!(
                "INSERT INTO {} (entity_kind, entity_id, changed_at) VALUES {}",
                CHANGE_LOG_TABLE,
                rows.join(", ")
            );
            let res = self
                .db
                .execute(Statement::from_sql_and_values(backend, &sql, values))
                .await?;
            inserted += res.rows_affected();
        }
        Ok(inserted)
    }
}

#[async_trait]
impl DueEntitySource for ChangeLogSource {
    fn name(&self) -> &'static str {
        "change_log"
    }

    /// 按写入顺序读取日志行；未知的实体类型不会被读取
    #[instrument(skip(self), level = "debug")]
    async fn due(&self, request: DueRequest) -> Result<Vec<ChangeRecord>> {
        let backend = self.db.get_database_backend();
        let kinds: Vec<Value> = EntityKind::ALL.iter().map(|k| text_value(k.as_str())).collect();
        let mut sql = format!(
            "SELECT change_id, entity_kind, entity_id, changed_at FROM {} WHERE entity_kind IN ({})",
            CHANGE_LOG_TABLE,
            placeholders(backend, 1, kinds.len())
        );
        let mut values = kinds;
        if let Some(since) = request.since() {
            values.push(Value::BigInt(Some(since)));
            sql.push_str(&format!(" AND changed_at >= {}", placeholder(backend, values.len())));
        }
        values.push(Value::BigInt(Some(request.sql_limit()?)));
        sql.push_str(&format!(
            " ORDER BY change_id LIMIT {}",
            placeholder(backend, values.len())
        ));

        let rows = self
            .db
            .query_all(Statement::from_sql_and_values(backend, &sql, values))
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let change_id: i64 = row.try_get("", "change_id")?;
            let kind: String = row.try_get("", "entity_kind")?;
            let entity_id: i64 = row.try_get("", "entity_id")?;
            let changed_at: i64 = row.try_get("", "changed_at")?;
            records.push(ChangeRecord {
                entity: EntityRef::new(kind.parse()?, entity_id),
                changed_at,
                change_id: Some(change_id),
            });
        }
        debug!("Change log source found {} due change(s)", records.len());
        Ok(records)
    }

    /// 删除恰好这些已读取的日志行
    #[instrument(skip(self, records), level = "debug", fields(count = records.len()))]
    async fn commit(&self, records: &[ChangeRecord]) -> Result<u64> {
        let ids: Vec<i64> = records.iter().filter_map(|r| r.change_id).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let backend = self.db.get_database_backend();
        let mut deleted = 0u64;
        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!(
                "DELETE FROM {} WHERE change_id IN ({})",
                CHANGE_LOG_TABLE,
                placeholders(backend, 1, chunk.len())
            );
            let res = self
                .db
                .execute(Statement::from_sql_and_values(backend, &sql, int_values(chunk)))
                .await?;
            deleted += res.rows_affected();
        }
        debug!("Removed {} change log row(s)", deleted);
        Ok(deleted)
    }
}
