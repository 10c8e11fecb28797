//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存驱逐器：把具体模式解析为实际的缓存键并批量删除。

use crate::backend::KeyValueCache;
use crate::error::Result;
use crate::pattern::ConcretePattern;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// 一次驱逐的结果
///
/// `deleted` 是唯一的成功信号；不报告具体删除了哪些键。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    /// 解析的模式数量
    pub patterns: usize,
    /// 去重后匹配到的键数量
    pub matched: usize,
    /// 实际删除的键数量
    pub deleted: u64,
}

/// 缓存驱逐器
#[derive(Clone)]
pub struct CacheEvictor {
    cache: Arc<dyn KeyValueCache>,
    key_prefix: String,
}

impl CacheEvictor {
    pub fn new(cache: Arc<dyn KeyValueCache>, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// 解析所有模式并合并匹配的键
    #[instrument(skip(self, patterns), level = "debug", fields(patterns = patterns.len()))]
    pub async fn matching_keys(
        &self,
        patterns: &BTreeSet<ConcretePattern>,
    ) -> Result<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        for pattern in patterns {
            let rendered = pattern.render(&self.key_prefix);
            let matched = self.cache.list_keys(&rendered).await?;
            debug!("Pattern {} matched {} key(s)", rendered, matched.len());
            keys.extend(matched);
        }
        Ok(keys)
    }

    /// 驱逐匹配这些模式的所有键
    ///
    /// 没有匹配的键时不发出删除调用，结果为0。重复执行是安全的。
    #[instrument(skip(self, patterns), level = "debug", fields(patterns = patterns.len()))]
    pub async fn evict(&self, patterns: &BTreeSet<ConcretePattern>) -> Result<EvictionOutcome> {
        if patterns.is_empty() {
            return Ok(EvictionOutcome::default());
        }

        let keys = self.matching_keys(patterns).await?;
        if keys.is_empty() {
            debug!("No cache keys matched {} pattern(s), skipping delete", patterns.len());
            return Ok(EvictionOutcome {
                patterns: patterns.len(),
                matched: 0,
                deleted: 0,
            });
        }

        let keys: Vec<String> = keys.into_iter().collect();
        let deleted = self.cache.delete_keys(&keys).await?;
        debug!("Deleted {} of {} matched key(s)", deleted, keys.len());
        Ok(EvictionOutcome {
            patterns: patterns.len(),
            matched: keys.len(),
            deleted,
        })
    }
}
