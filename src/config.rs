//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效服务的配置结构和解析逻辑。

use crate::error::{CacheError, Result};
use crate::pattern::{GeneratorConfig, LocaleSet};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_VERSION: u32 = 1;
pub const CONFIG_VERSION_FIELD: &str = "config_version";

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "pilotcache.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub invalidation: InvalidationConfig,
}

/// 全局配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GlobalConfig {
    /// 服务名称（用于日志和追踪）
    pub service_name: String,
    /// 受支持的语言，有序
    pub locales: Vec<String>,
    /// 缓存键前缀
    pub key_prefix: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            service_name: "pilotcache".to_string(),
            locales: ["en", "es", "fr", "pt"].iter().map(|s| s.to_string()).collect(),
            key_prefix: "/".to_string(),
        }
    }
}

/// 关系数据库配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 连接字符串：postgres://、mysql:// 或 sqlite:
    pub url: SecretString,
    pub max_connections: u32,
    pub min_connections: u32,
    /// 连接超时时间（毫秒）
    pub connect_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: SecretString::new("sqlite:pilotcache.db".to_string().into()),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_ms: 5000,
        }
    }
}

/// 缓存后端类型
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Redis,
    /// 进程内缓存，用于开发和测试
    Memory,
}

/// Redis模式枚举
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    /// 单机模式
    #[default]
    Standalone,
    /// 哨兵模式
    Sentinel,
}

/// 键值缓存配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// Redis模式
    pub mode: RedisMode,
    /// 连接字符串
    pub connection_string: SecretString,
    /// 连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// 命令执行超时时间（毫秒）
    pub command_timeout_ms: u64,
    /// SCAN 每次迭代的 COUNT 提示
    pub scan_count: u32,
    /// Redis 密码（可选，使用 SecretString 保护）
    pub password: Option<SecretString>,
    /// 是否启用 TLS
    pub enable_tls: bool,
    /// 哨兵配置
    pub sentinel: Option<SentinelConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Redis,
            mode: RedisMode::Standalone,
            connection_string: SecretString::new("redis://localhost:6379".to_string().into()),
            connection_timeout_ms: 5000,
            command_timeout_ms: 3000,
            scan_count: 1000,
            password: None,
            enable_tls: false,
            sentinel: None,
        }
    }
}

/// 哨兵配置
#[derive(Deserialize, Clone, Debug)]
pub struct SentinelConfig {
    /// 主节点名称
    pub master_name: String,
    /// 哨兵节点列表
    pub nodes: Vec<String>,
}

/// 失效周期的执行方式
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationMode {
    /// 同步计算并驱逐，不经过队列
    #[default]
    Direct,
    /// 先写入持久队列，再按批次驱逐
    Staged,
}

impl InvalidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationMode::Direct => "direct",
            InvalidationMode::Staged => "staged",
        }
    }
}

impl std::fmt::Display for InvalidationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 变更来源
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// 比较 `modified_at` 与 `cache_updated_at`
    #[default]
    Watermark,
    /// 读取 `catalog_change_log` 表
    ChangeLog,
}

/// 失效配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct InvalidationConfig {
    pub mode: InvalidationMode,
    pub source: SourceKind,
    /// 每个周期默认处理的最大变更数
    pub row_limit: u64,
    /// 暂存模式下每批认领的最大队列行数
    pub batch_size: u64,
    /// 向上遍历的祖先分类层数
    pub listing_depth: u32,
    /// 替代链遍历的最大步数
    pub supersession_max_depth: u32,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            mode: InvalidationMode::Direct,
            source: SourceKind::Watermark,
            row_limit: 500,
            batch_size: 1000,
            listing_depth: 2,
            supersession_max_depth: 32,
        }
    }
}

impl InvalidationConfig {
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            listing_depth: self.listing_depth,
            supersession_max_depth: self.supersession_max_depth,
        }
    }
}

impl Config {
    /// 从TOML文件加载并验证配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// 从TOML字符串解析并验证配置
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate().map_err(CacheError::ConfigError)?;
        Ok(config)
    }

    /// 已验证的语言集合
    pub fn locale_set(&self) -> Result<LocaleSet> {
        LocaleSet::new(self.global.locales.iter().cloned())
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有必需的字段都已设置，并且值在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        // 验证配置版本
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        // 验证全局配置
        if self.global.service_name.trim().is_empty() {
            return Err("Global service_name cannot be empty".to_string());
        }

        if self.global.service_name.len() > 64 {
            return Err(format!(
                "Service name '{}' exceeds maximum length of 64 characters",
                self.global.service_name
            ));
        }

        if let Err(e) = self.locale_set() {
            return Err(format!("Invalid locales: {}", e));
        }

        // 验证数据库配置
        if self.database.max_connections == 0 {
            return Err("Database max_connections cannot be zero".to_string());
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(format!(
                "Database min_connections ({}) must be <= max_connections ({})",
                self.database.min_connections, self.database.max_connections
            ));
        }

        if !(100..=30000).contains(&self.database.connect_timeout_ms) {
            return Err("Database connect_timeout_ms must be between 100 and 30000 ms".to_string());
        }

        // 验证缓存配置
        let cache = &self.cache;
        if !(100..=30000).contains(&cache.connection_timeout_ms) {
            return Err("Cache connection_timeout_ms must be between 100 and 30000 ms".to_string());
        }

        if !(100..=60000).contains(&cache.command_timeout_ms) {
            return Err("Cache command_timeout_ms must be between 100 and 60000 ms".to_string());
        }

        if cache.scan_count == 0 {
            return Err("Cache scan_count cannot be zero".to_string());
        }

        if cache.backend == CacheBackendKind::Redis && cache.mode == RedisMode::Sentinel {
            match &cache.sentinel {
                None => {
                    return Err("Sentinel mode requires a [cache.sentinel] section".to_string())
                }
                Some(sentinel) if sentinel.nodes.is_empty() => {
                    return Err("Sentinel configuration must list at least one node".to_string())
                }
                Some(sentinel) if sentinel.master_name.is_empty() => {
                    return Err("Sentinel master_name cannot be empty".to_string())
                }
                Some(_) => {}
            }
        }

        // 验证失效配置
        let inv = &self.invalidation;
        if inv.row_limit == 0 {
            return Err("Invalidation row_limit cannot be zero".to_string());
        }

        if inv.batch_size == 0 {
            return Err("Invalidation batch_size cannot be zero".to_string());
        }

        if inv.batch_size > 100_000 {
            return Err("Invalidation batch_size cannot exceed 100000".to_string());
        }

        if inv.listing_depth == 0 {
            return Err("Invalidation listing_depth cannot be zero".to_string());
        }

        if inv.supersession_max_depth == 0 {
            return Err("Invalidation supersession_max_depth cannot be zero".to_string());
        }

        Ok(())
    }
}
