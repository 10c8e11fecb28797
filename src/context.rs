//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了应用上下文，负责按配置组装各个协作者。
//!
//! 数据库连接和缓存句柄由入口点创建并注入，不存在进程级的全局客户端。

use crate::backend::{self, KeyValueCache};
use crate::catalog::store::SeaOrmCatalogStore;
use crate::config::{Config, InvalidationMode, SourceKind};
use crate::database;
use crate::error::Result;
use crate::pattern::{LocaleExpander, PatternGenerator};
use crate::sync::{
    BatchQueue, CacheEvictor, ChangeLogSource, DueEntitySource, InvalidationOrchestrator,
    WatermarkSource,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::info;

/// 进程内共享的依赖集合
#[derive(Clone)]
pub struct AppContext {
    pub config: Config,
    pub db: Arc<DatabaseConnection>,
    pub cache: Arc<dyn KeyValueCache>,
    pub orchestrator: InvalidationOrchestrator,
}

impl AppContext {
    /// 连接数据库和缓存后端并组装编排器
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = Arc::new(database::connect(&config.database).await?);
        let cache = backend::connect(&config.cache).await?;
        Self::with_handles(config, db, cache)
    }

    /// 使用已有的连接组装
    pub fn with_handles(
        config: &Config,
        db: Arc<DatabaseConnection>,
        cache: Arc<dyn KeyValueCache>,
    ) -> Result<Self> {
        let invalidation = &config.invalidation;

        let store = Arc::new(SeaOrmCatalogStore::new(db.clone()));
        let generator = PatternGenerator::new(store, invalidation.generator_config());
        let expander = LocaleExpander::new(config.locale_set()?);
        let evictor = CacheEvictor::new(cache.clone(), config.global.key_prefix.clone());

        let source: Arc<dyn DueEntitySource> = match invalidation.source {
            SourceKind::Watermark => Arc::new(WatermarkSource::new(db.clone())),
            SourceKind::ChangeLog => Arc::new(ChangeLogSource::new(db.clone())),
        };

        let mut orchestrator = InvalidationOrchestrator::new(source, generator, expander, evictor)
            .with_service_name(config.global.service_name.clone());
        if invalidation.mode == InvalidationMode::Staged {
            orchestrator =
                orchestrator.with_queue(BatchQueue::new(db.clone()), invalidation.batch_size);
        }

        info!(
            service = %config.global.service_name,
            mode = %invalidation.mode,
            source = ?invalidation.source,
            "Application context ready"
        );

        Ok(Self {
            config: config.clone(),
            db,
            cache,
            orchestrator,
        })
    }
}
