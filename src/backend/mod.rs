//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了键值缓存接口及其Redis和内存实现。

pub mod memory;
pub mod redis;
pub mod redis_provider;

use crate::config::{CacheBackendKind, CacheConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

/// 键值缓存接口
///
/// 只需要两个操作：按 glob 模式列出键，以及批量删除。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// 列出匹配 glob 模式的所有键
    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// 删除给定的键，返回实际删除的数量
    ///
    /// 空列表是无操作，返回0。
    async fn delete_keys(&self, keys: &[String]) -> Result<u64>;
}

/// 根据配置创建缓存后端
#[instrument(skip(config), level = "info", fields(backend = ?config.backend))]
pub async fn connect(config: &CacheConfig) -> Result<Arc<dyn KeyValueCache>> {
    match config.backend {
        CacheBackendKind::Redis => Ok(Arc::new(RedisCache::new(config).await?)),
        CacheBackendKind::Memory => Ok(Arc::new(MemoryCache::new())),
    }
}
