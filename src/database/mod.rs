//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 关系数据库连接管理
//!
//! 提供连接建立、后端相关的参数占位符以及表结构管理。

pub mod schema;

use crate::config::DatabaseConfig;
use crate::error::{CacheError, Result};
use crate::utils::redaction::redact_connection_string;
use sea_orm::{ConnectOptions, Database, DatabaseBackend, DatabaseConnection, Value};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

pub use schema::migrate;

/// 单条语句中IN列表的最大参数数量
pub(crate) const IN_CHUNK: usize = 500;

/// 数据库类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseType {
    PostgreSQL,
    MySQL,
    SQLite, // 用于测试和开发
}

impl DatabaseType {
    /// 从URL字符串解析数据库类型
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else if url.starts_with("mysql://") {
            DatabaseType::MySQL
        } else {
            DatabaseType::SQLite
        }
    }

    pub fn backend(&self) -> DatabaseBackend {
        match self {
            DatabaseType::PostgreSQL => DatabaseBackend::Postgres,
            DatabaseType::MySQL => DatabaseBackend::MySql,
            DatabaseType::SQLite => DatabaseBackend::Sqlite,
        }
    }
}

/// 规范化SQLite连接字符串
///
/// 文件数据库补充 `mode=rwc`，使不存在的文件被自动创建；内存数据库保持不变。
pub fn normalize_connection_string(url: &str) -> String {
    if DatabaseType::from_url(url) != DatabaseType::SQLite {
        return url.to_string();
    }
    if url.contains(":memory:") || url.contains("mode=") {
        return url.to_string();
    }
    let base = if url.starts_with("sqlite:") {
        url.to_string()
    } else {
        format!("sqlite:{}", url)
    };
    if base.contains('?') {
        format!("{}&mode=rwc", base)
    } else {
        format!("{}?mode=rwc", base)
    }
}

/// 建立数据库连接
#[instrument(skip(config), level = "info", name = "connect_database")]
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    let raw = config.url.expose_secret();
    let normalized = normalize_connection_string(raw);
    info!(
        "Connecting to {:?} database: {}",
        DatabaseType::from_url(&normalized),
        redact_connection_string(&normalized)
    );

    let mut opt = ConnectOptions::new(normalized);
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .sqlx_logging(false);

    Database::connect(opt)
        .await
        .map_err(|e| CacheError::DatabaseError(format!("Failed to open database: {}", e)))
}

/// 第 `position` 个参数的占位符（从1开始）
pub(crate) fn placeholder(backend: DatabaseBackend, position: usize) -> String {
    match backend {
        DatabaseBackend::Postgres => format!("${}", position),
        _ => "?".to_string(),
    }
}

/// 从 `start` 开始的 `count` 个逗号分隔占位符
pub(crate) fn placeholders(backend: DatabaseBackend, start: usize, count: usize) -> String {
    (start..start + count)
        .map(|position| placeholder(backend, position))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn int_values(ids: &[i64]) -> Vec<Value> {
    ids.iter().map(|id| Value::BigInt(Some(*id))).collect()
}

pub(crate) fn text_value(value: &str) -> Value {
    Value::String(Some(Box::new(value.to_string())))
}

/// 当前时间（毫秒时间戳）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
