//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于Redis的键值缓存实现。

use super::redis_provider::{DefaultRedisProvider, RedisProvider};
use super::KeyValueCache;
use crate::config::{CacheConfig, RedisMode};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, instrument};

/// 单条 DEL 命令携带的最大键数
const DELETE_CHUNK: usize = 1000;

/// Redis缓存实现
///
/// 单机模式和哨兵模式共用同一个 `ConnectionManager`，由它负责重连。
#[derive(Clone)]
pub struct RedisCache {
    client: Client,
    manager: ConnectionManager,
    command_timeout_ms: u64,
    scan_count: u32,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("command_timeout_ms", &self.command_timeout_ms)
            .field("scan_count", &self.scan_count)
            .finish()
    }
}

impl RedisCache {
    /// 创建新的Redis缓存实例
    #[instrument(skip(config), level = "info", name = "init_redis_cache")]
    pub async fn new(config: &CacheConfig) -> Result<Self> {
        Self::new_with_provider(config, Arc::new(DefaultRedisProvider)).await
    }

    /// 使用指定的Redis提供者创建实例
    #[instrument(skip(config, provider), level = "info", fields(mode = ?config.mode))]
    pub async fn new_with_provider(
        config: &CacheConfig,
        provider: Arc<dyn RedisProvider>,
    ) -> Result<Self> {
        debug!("Initializing RedisCache with mode: {:?}", config.mode);
        let (client, manager) = match config.mode {
            RedisMode::Standalone => provider.get_standalone_client(config).await?,
            RedisMode::Sentinel => provider.get_sentinel_client(config).await?,
        };
        Ok(Self {
            client,
            manager,
            command_timeout_ms: config.command_timeout_ms,
            scan_count: config.scan_count,
        })
    }

    /// 获取命令超时时间（毫秒）
    pub fn command_timeout_ms(&self) -> u64 {
        self.command_timeout_ms
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn with_timeout<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(Duration::from_millis(self.command_timeout_ms), fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(CacheError::Timeout(format!(
                "Redis {} timed out after {}ms",
                op, self.command_timeout_ms
            ))),
        }
    }

    /// 检查连接是否正常
    #[instrument(skip(self), level = "debug")]
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let response: String = self
            .with_timeout("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        debug!("Redis responded to PING: {}", response);
        Ok(())
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    /// 使用 SCAN MATCH 遍历键空间，避免 KEYS 阻塞服务器
    #[instrument(skip(self), level = "debug")]
    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let mut found = BTreeSet::new();
        let mut cursor = 0u64;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = self
                .with_timeout(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(self.scan_count)
                        .query_async(&mut conn),
                )
                .await?;

            // SCAN 可能重复返回同一个键
            found.extend(keys);

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        debug!("Pattern {} matched {} key(s)", pattern, found.len());
        Ok(found.into_iter().collect())
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn delete_keys(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let mut deleted = 0u64;
        for chunk in keys.chunks(DELETE_CHUNK) {
            let count: u64 = self
                .with_timeout("DEL", redis::cmd("DEL").arg(chunk.to_vec()).query_async(&mut conn))
                .await?;
            deleted += count;
        }
        debug!("Deleted {} of {} key(s)", deleted, keys.len());
        Ok(deleted)
    }
}
