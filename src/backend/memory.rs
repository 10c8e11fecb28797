//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内的键值缓存实现，用于开发环境和测试。

use super::KeyValueCache;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// 内存缓存
///
/// 按 Redis glob 语义匹配键，并统计 `list_keys` 与 `delete_keys` 的调用次数。
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, String>>,
    list_calls: Arc<AtomicU64>,
    delete_calls: Arc<AtomicU64>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 已发出的列表调用次数
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// 已发出的删除调用次数
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::Relaxed)
    }
}

/// 把 Redis glob 模式转换为锚定的正则表达式
///
/// 支持 `*`、`?`、`[...]`（含 `[^...]`）以及反斜杠转义。
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if matches!(inner, '\\' | '[' | '&' | '~') {
                        out.push('\\');
                    }
                    out.push(inner);
                }
                if !closed {
                    return Err(CacheError::InvalidInput(format!(
                        "unterminated character class in pattern '{}'",
                        pattern
                    )));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
        .map_err(|e| CacheError::InvalidInput(format!("invalid pattern '{}': {}", pattern, e)))
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    #[instrument(skip(self), level = "debug")]
    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let matcher = glob_to_regex(pattern)?;
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        debug!("Pattern {} matched {} key(s)", pattern, keys.len());
        Ok(keys)
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn delete_keys(&self, keys: &[String]) -> Result<u64> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        let deleted = keys
            .iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count() as u64;
        Ok(deleted)
    }
}
