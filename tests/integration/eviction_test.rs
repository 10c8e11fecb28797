//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 缓存驱逐集成测试：幂等性与空匹配

#[path = "../common/mod.rs"]
mod common;

use common::{memory_cache, setup_logging};
use pilotcache::pattern::{ConcretePattern, Endpoint, Locale, MatchExpr};
use pilotcache::sync::CacheEvictor;
use std::collections::BTreeSet;
use std::sync::Arc;

fn patterns(entries: &[(Endpoint, i64, &str)]) -> BTreeSet<ConcretePattern> {
    entries
        .iter()
        .map(|(endpoint, id, locale)| {
            ConcretePattern::new(*endpoint, MatchExpr::id(*id), Locale::new(*locale).unwrap())
        })
        .collect()
}

#[tokio::test]
async fn test_eviction_is_idempotent() {
    setup_logging();
    let cache = memory_cache(&[
        "/single_product:500:en",
        "/single_product:500:es",
        "/product_listing:3:fr",
    ]);
    let evictor = CacheEvictor::new(Arc::new(cache.clone()), "/");
    let set = patterns(&[
        (Endpoint::SingleProduct, 500, "en"),
        (Endpoint::SingleProduct, 500, "es"),
        (Endpoint::ProductListing, 3, "fr"),
    ]);

    let first = evictor.evict(&set).await.unwrap();
    assert_eq!(first.deleted, 3);
    assert!(cache.is_empty());

    let second = evictor.evict(&set).await.unwrap();
    assert_eq!(second.deleted, 0);
    assert_eq!(cache.delete_calls(), 1);
}

#[tokio::test]
async fn test_zero_matches_skip_delete() {
    setup_logging();
    let cache = memory_cache(&["/single_product:501:en"]);
    let evictor = CacheEvictor::new(Arc::new(cache.clone()), "/");
    let set = patterns(&[
        (Endpoint::DiagramPage, 70, "en"),
        (Endpoint::DiagramPage, 70, "pt"),
    ]);

    let outcome = evictor.evict(&set).await.unwrap();
    assert_eq!(outcome.deleted, 0);
    assert_eq!(outcome.patterns, 2);
    assert_eq!(cache.list_calls(), 2);
    assert_eq!(cache.delete_calls(), 0);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_overlapping_patterns_delete_each_key_once() {
    setup_logging();
    let cache = memory_cache(&["/content:about-us:en", "/content:about-team:en"]);
    let evictor = CacheEvictor::new(Arc::new(cache.clone()), "/");
    let en = Locale::new("en").unwrap();
    let set: BTreeSet<ConcretePattern> = [
        ConcretePattern::new(Endpoint::Content, MatchExpr::Any, en.clone()),
        ConcretePattern::new(Endpoint::Content, MatchExpr::from_filter(Some("about")), en.clone()),
        ConcretePattern::new(Endpoint::Content, MatchExpr::Exact("about-us".to_string()), en),
    ]
    .into_iter()
    .collect();

    let outcome = evictor.evict(&set).await.unwrap();
    assert_eq!(outcome.matched, 2);
    assert_eq!(outcome.deleted, 2);
}
