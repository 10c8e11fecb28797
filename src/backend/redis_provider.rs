//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Redis连接提供者接口和默认实现。

use crate::{
    config::CacheConfig,
    error::{CacheError, Result},
    utils::redaction::redact_connection_string,
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use secrecy::ExposeSecret;
use tokio::time::{timeout, Duration};

#[async_trait]
pub trait RedisProvider: Send + Sync {
    async fn get_standalone_client(&self, config: &CacheConfig)
        -> Result<(Client, ConnectionManager)>;
    async fn get_sentinel_client(&self, config: &CacheConfig)
        -> Result<(Client, ConnectionManager)>;
}

pub struct DefaultRedisProvider;

impl DefaultRedisProvider {
    /// 单机模式的连接字符串，启用 TLS 时改用 `rediss://`
    pub fn standalone_url(config: &CacheConfig) -> String {
        let raw = config.connection_string.expose_secret();
        if config.enable_tls && !raw.starts_with("rediss://") {
            raw.replace("redis://", "rediss://")
        } else {
            raw.to_string()
        }
    }

    /// 哨兵连接字符串：`redis+sentinel://[:password@]host:port[,host:port]/master`
    pub fn sentinel_url(config: &CacheConfig) -> Result<String> {
        let sentinel = config.sentinel.as_ref().ok_or_else(|| {
            CacheError::ConfigError("Sentinel configuration is missing".to_string())
        })?;

        let nodes: Vec<String> = sentinel
            .nodes
            .iter()
            .map(|n| {
                n.trim_start_matches("redis://")
                    .trim_start_matches("redis+sentinel://")
                    .to_string()
            })
            .collect();
        if nodes.is_empty() {
            return Err(CacheError::ConfigError(
                "No sentinel nodes provided".to_string(),
            ));
        }

        let mut url = "redis+sentinel://".to_string();
        if let Some(password) = &config.password {
            url.push_str(&format!(":{}@", password.expose_secret()));
        }
        url.push_str(&nodes.join(","));
        url.push('/');
        url.push_str(&sentinel.master_name);
        Ok(url)
    }

    async fn manager(client: &Client, timeout_ms: u64, target: &str) -> Result<ConnectionManager> {
        match timeout(
            Duration::from_millis(timeout_ms),
            client.get_connection_manager(),
        )
        .await
        {
            Ok(res) => Ok(res?),
            Err(_) => Err(CacheError::Timeout(format!(
                "Connection timed out after {}ms. Target: {}",
                timeout_ms,
                redact_connection_string(target)
            ))),
        }
    }
}

#[async_trait]
impl RedisProvider for DefaultRedisProvider {
    async fn get_standalone_client(
        &self,
        config: &CacheConfig,
    ) -> Result<(Client, ConnectionManager)> {
        let url = Self::standalone_url(config);
        let client = Client::open(url.as_str())?;
        let manager = Self::manager(&client, config.connection_timeout_ms, &url).await?;
        Ok((client, manager))
    }

    async fn get_sentinel_client(
        &self,
        config: &CacheConfig,
    ) -> Result<(Client, ConnectionManager)> {
        tracing::info!("Initializing Sentinel client with automatic failover support");
        let url = Self::sentinel_url(config)?;
        let client = Client::open(url.as_str())?;
        // ConnectionManager 通过 redis+sentinel:// 处理重连和主从切换
        let manager = Self::manager(&client, config.connection_timeout_ms, &url).await?;
        Ok((client, manager))
    }
}
