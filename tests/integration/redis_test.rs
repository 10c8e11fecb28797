//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! Redis集成测试，Redis 不可用时跳过

#[path = "../common/mod.rs"]
mod common;

use common::{is_redis_available, redis_url, setup_logging};
use pilotcache::backend::{KeyValueCache, RedisCache};
use pilotcache::config::CacheConfig;
use pilotcache::pattern::{ConcretePattern, Endpoint, Locale, MatchExpr};
use pilotcache::sync::CacheEvictor;
use secrecy::SecretString;
use std::collections::BTreeSet;
use std::sync::Arc;

fn config() -> CacheConfig {
    CacheConfig {
        connection_string: SecretString::new(redis_url().into()),
        scan_count: 10,
        ..Default::default()
    }
}

/// 每个测试使用独立的键前缀
fn prefix() -> String {
    format!("/pilotcache-test-{}/", uuid::Uuid::new_v4().simple())
}

async fn seed(cache: &RedisCache, keys: &[String]) {
    let mut conn = cache
        .client()
        .get_multiplexed_async_connection()
        .await
        .unwrap();
    for key in keys {
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg("{}")
            .arg("EX")
            .arg(300)
            .query_async(&mut conn)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_list_and_delete_keys() {
    setup_logging();
    if !is_redis_available().await {
        println!("跳过测试: Redis不可用");
        return;
    }

    let cache = RedisCache::new(&config()).await.unwrap();
    cache.ping().await.unwrap();

    let prefix = prefix();
    let keys: Vec<String> = (0..25)
        .map(|i| format!("{}single_product:{}:en", prefix, i))
        .collect();
    seed(&cache, &keys).await;

    let listed = cache
        .list_keys(&format!("{}single_product:*:en", prefix))
        .await
        .unwrap();
    assert_eq!(listed.len(), 25);

    assert_eq!(cache.delete_keys(&listed).await.unwrap(), 25);
    assert_eq!(cache.delete_keys(&listed).await.unwrap(), 0);
    assert_eq!(cache.delete_keys(&[]).await.unwrap(), 0);
}

#[tokio::test]
async fn test_evictor_against_redis() {
    setup_logging();
    if !is_redis_available().await {
        println!("跳过测试: Redis不可用");
        return;
    }

    let cache = RedisCache::new(&config()).await.unwrap();
    let prefix = prefix();
    seed(
        &cache,
        &[
            format!("{}single_product:500:en", prefix),
            format!("{}product_listing:3:fr", prefix),
            format!("{}single_product:501:en", prefix),
        ],
    )
    .await;

    let evictor = CacheEvictor::new(Arc::new(cache.clone()), prefix.clone());
    let set: BTreeSet<ConcretePattern> = [
        (Endpoint::SingleProduct, 500, "en"),
        (Endpoint::ProductListing, 3, "fr"),
        (Endpoint::ProductListing, 3, "en"),
    ]
    .into_iter()
    .map(|(endpoint, id, locale)| {
        ConcretePattern::new(endpoint, MatchExpr::id(id), Locale::new(locale).unwrap())
    })
    .collect();

    assert_eq!(evictor.evict(&set).await.unwrap().deleted, 2);
    assert_eq!(evictor.evict(&set).await.unwrap().deleted, 0);

    let rest = cache
        .list_keys(&format!("{}*", prefix))
        .await
        .unwrap();
    assert_eq!(rest, vec![format!("{}single_product:501:en", prefix)]);
    cache.delete_keys(&rest).await.unwrap();
}
