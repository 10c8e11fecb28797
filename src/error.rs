//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存失效系统的错误类型和处理机制。

use std::fmt;
use thiserror::Error;

/// 失效周期的阶段
///
/// 周期按 Identify → Generate → Evict → Commit 顺序执行，
/// Commit 只在 Evict 成功之后运行。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// 确定到期的变更记录
    Identify,
    /// 生成并展开缓存键模式
    Generate,
    /// 入队（分批模式）
    Stage,
    /// 删除缓存键
    Evict,
    /// 推进水位线或删除队列条目
    Commit,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Identify => "identify",
            CyclePhase::Generate => "generate",
            CyclePhase::Stage => "stage",
            CyclePhase::Evict => "evict",
            CyclePhase::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 上游不可达，调用方可以安全地重新触发
    Retryable,
    /// 输入或配置错误，重试不会成功
    Terminal,
}

/// 缓存失效系统错误类型枚举
#[derive(Error, Debug)]
pub enum CacheError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 输入不合法（未知的端点、未配置的语言等）
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 批次不存在或已完成
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    /// Sea-ORM数据库错误
    #[error("Sea-ORM error: {0}")]
    SeaOrmError(#[from] sea_orm::DbErr),

    /// 数据库错误
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Redis错误
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// 缓存后端错误
    #[error("Backend error: {0}")]
    BackendError(String),

    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 配置文件解析错误
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// 周期在某个阶段中止，未提交
    #[error("Invalidation cycle aborted during {phase}: {source}")]
    CycleAborted {
        phase: CyclePhase,
        #[source]
        source: Box<CacheError>,
    },
}

impl CacheError {
    /// 将错误包装为某个阶段的中止
    pub fn aborted(phase: CyclePhase, source: CacheError) -> Self {
        CacheError::CycleAborted {
            phase,
            source: Box::new(source),
        }
    }

    /// 返回错误分类
    pub fn class(&self) -> ErrorClass {
        match self {
            CacheError::SeaOrmError(_)
            | CacheError::DatabaseError(_)
            | CacheError::RedisError(_)
            | CacheError::BackendError(_)
            | CacheError::Timeout(_)
            | CacheError::IoError(_) => ErrorClass::Retryable,
            CacheError::ConfigError(_)
            | CacheError::InvalidInput(_)
            | CacheError::BatchNotFound(_)
            | CacheError::ConfigParse(_) => ErrorClass::Terminal,
            CacheError::CycleAborted { source, .. } => source.class(),
        }
    }

    /// 调用方是否可以安全重试
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// 中止的阶段（如果有）
    pub fn phase(&self) -> Option<CyclePhase> {
        match self {
            CacheError::CycleAborted { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// 缓存操作结果类型别名
pub type Result<T> = std::result::Result<T, CacheError>;
