//! pilotcache - 产品目录的缓存失效服务
//!
//! 根据目录变更推导缓存键模式，按语言展开后从 Redis 中驱逐，
//! 并且只在驱逐成功之后推进水位线或删除队列行。

#![doc(html_root_url = "https://docs.rs/pilotcache/0.1.0")]

pub mod api;
pub mod backend;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod metrics;
pub mod pattern;
pub mod sync;
pub mod telemetry;
pub mod utils;

// Re-export commonly used items
pub use api::{EvictionSummary, PatternRequest, UpdatedTrigger};
pub use backend::{KeyValueCache, MemoryCache, RedisCache};
pub use catalog::{CatalogStore, ChangeRecord, EntityKind, EntityRef};
pub use config::Config;
pub use context::AppContext;
pub use error::{CacheError, Result};
pub use pattern::{
    ConcretePattern, Endpoint, KeyPattern, LocaleExpander, LocaleSet, PatternGenerator,
};
pub use sync::{CycleReport, DueRequest, InvalidationOrchestrator};

/// pilotcache 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
