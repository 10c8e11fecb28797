//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了测试的通用工具函数和设置。

#![allow(dead_code)]

use pilotcache::backend::{KeyValueCache, MemoryCache};
use pilotcache::catalog::store::SeaOrmCatalogStore;
use pilotcache::database::migrate;
use pilotcache::pattern::{GeneratorConfig, LocaleExpander, LocaleSet, PatternGenerator};
use pilotcache::sync::{CacheEvictor, DueEntitySource, InvalidationOrchestrator};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(EnvFilter::new("debug,sqlx=warn"))
            .try_init()
            .ok();
    });
}

/// 内存 SQLite 数据库，已创建队列、变更日志和目录表
///
/// 内存数据库按连接隔离，因此连接池固定为一个连接。
pub async fn memory_db() -> Arc<DatabaseConnection> {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
    opt.max_connections(1)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    let db = Database::connect(opt).await.expect("sqlite connect");
    migrate(&db, true).await.expect("migrate");
    Arc::new(db)
}

pub async fn exec(db: &DatabaseConnection, sql: &str) {
    db.execute(Statement::from_string(db.get_database_backend(), sql.to_string()))
        .await
        .unwrap_or_else(|e| panic!("{}: {}", sql, e));
}

/// 目录夹具：
///
/// - 分类 12 的父分类是 3，分类 3 是根
/// - 产品 500 位于分类 12，`modified_at` 晚于水位线
/// - 产品 501 位于分类 3，已同步
pub async fn seed_scenario_a(db: &DatabaseConnection) {
    exec(db, "INSERT INTO categories (category_id, parent_id) VALUES (3, NULL), (12, 3)").await;
    exec(
        db,
        "INSERT INTO products (product_id, category_id, quantity, modified_at, cache_updated_at) \
         VALUES (500, 12, 4, 2000, 1000), (501, 3, 1, 1000, 1000)",
    )
    .await;
}

/// 按组件组装一个直接模式的编排器
pub fn orchestrator(
    db: Arc<DatabaseConnection>,
    source: Arc<dyn DueEntitySource>,
    cache: Arc<dyn KeyValueCache>,
) -> InvalidationOrchestrator {
    let store = Arc::new(SeaOrmCatalogStore::new(db));
    InvalidationOrchestrator::new(
        source,
        PatternGenerator::new(store, GeneratorConfig::default()),
        LocaleExpander::new(LocaleSet::default()),
        CacheEvictor::new(cache, "/"),
    )
}

/// 带有若干缓存条目的内存缓存
pub fn memory_cache(keys: &[&str]) -> MemoryCache {
    let cache = MemoryCache::new();
    for key in keys {
        cache.insert(*key, "{}");
    }
    cache
}

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// 检查Redis是否可用
///
/// 尝试连接并发送 PING，两秒内未响应视为不可用
pub async fn is_redis_available() -> bool {
    let client = match redis::Client::open(redis_url()) {
        Ok(client) => client,
        Err(_) => return false,
    };
    let ping = async {
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await
    };
    matches!(
        tokio::time::timeout(Duration::from_secs(2), ping).await,
        Ok(Ok(_))
    )
}
